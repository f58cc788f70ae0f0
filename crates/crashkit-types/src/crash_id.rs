//! Crash identifier codec.
//!
//! A crash identifier is an opaque string whose final seven characters
//! encode how it is stored: one depth digit followed by the creation date
//! as `YYMMDD`.
//!
//! ```text
//! de1144f2-4c3a-4a8b-b5a3-8e5c12  2  240317
//! |------ random uuid prefix -----|  |  |----| creation date (2024-03-17)
//!                                    radix depth
//! ```
//!
//! Identifiers that do not carry a well-formed suffix are still accepted as
//! long as they are safe to use as a single path component; storage falls
//! back to the current date and the configured default depth for them.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Default radix depth for newly generated identifiers.
pub const DEFAULT_DEPTH: u8 = 2;

/// Longest identifier accepted by [`CrashId::parse`].
pub const MAX_ID_LEN: usize = 128;

/// Length of the encoded `<depth><YYMMDD>` suffix.
const SUFFIX_LEN: usize = 7;

/// Unique identifier of one crash report.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CrashId(String);

impl CrashId {
    /// Validate `raw` and wrap it as a crash identifier.
    ///
    /// Rejects anything that could not be used verbatim as one directory
    /// name: empty strings, overlong strings, path separators, NUL,
    /// whitespace, a leading `.`, and `..`.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let reject = |reason: &str| {
            Err(TypeError::InvalidCrashId {
                id: raw.to_string(),
                reason: reason.to_string(),
            })
        };

        if raw.is_empty() {
            return reject("must not be empty");
        }
        if raw.len() > MAX_ID_LEN {
            return reject("too long");
        }
        if raw.starts_with('.') {
            return reject("must not start with '.'");
        }
        if raw.contains("..") {
            return reject("must not contain '..'");
        }
        if let Some(ch) = raw
            .chars()
            .find(|c| *c == '/' || *c == '\\' || *c == '\0' || c.is_whitespace() || c.is_control())
        {
            return reject(&format!("contains forbidden character {ch:?}"));
        }
        Ok(Self(raw.to_string()))
    }

    /// Mint a fresh identifier for a crash received on `date`.
    pub fn generate(date: NaiveDate, depth: u8) -> Result<Self, TypeError> {
        if depth > 9 {
            return Err(TypeError::InvalidDepth(depth));
        }
        let uuid = uuid::Uuid::new_v4().hyphenated().to_string();
        let prefix = &uuid[..uuid.len() - SUFFIX_LEN];
        Ok(Self(format!(
            "{prefix}{depth}{:02}{:02}{:02}",
            date.year().rem_euclid(100),
            date.month(),
            date.day()
        )))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation date encoded in the final six characters, if well-formed.
    pub fn date(&self) -> Option<NaiveDate> {
        let tail = self.0.get(self.0.len().checked_sub(6)?..)?;
        if !tail.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let yy: i32 = tail[0..2].parse().ok()?;
        let mm: u32 = tail[2..4].parse().ok()?;
        let dd: u32 = tail[4..6].parse().ok()?;
        NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
    }

    /// Radix depth encoded at position -7, if present.
    pub fn depth(&self) -> Option<u8> {
        let idx = self.0.len().checked_sub(SUFFIX_LEN)?;
        let byte = *self.0.as_bytes().get(idx)?;
        byte.is_ascii_digit().then(|| byte - b'0')
    }

    /// Characters available for radix segments.
    ///
    /// When the identifier carries a well-formed suffix the suffix is
    /// excluded, so shard directories are taken from the random prefix
    /// only.
    pub fn radix_source(&self) -> &str {
        if self.depth().is_some() && self.date().is_some() {
            &self.0[..self.0.len() - SUFFIX_LEN]
        } else {
            &self.0
        }
    }

    /// First `depth` two-character groups of [`radix_source`](Self::radix_source).
    ///
    /// Groups that would be incomplete are dropped, so short identifiers
    /// simply get a shallower tree.
    pub fn radix(&self, depth: u8) -> Vec<&str> {
        let source = self.radix_source();
        (0..depth as usize)
            .map_while(|i| source.get(i * 2..i * 2 + 2))
            .collect()
    }
}

impl fmt::Debug for CrashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrashId({})", self.0)
    }
}

impl fmt::Display for CrashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CrashId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CrashId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CrashId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CrashId> for String {
    fn from(id: CrashId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "de1144f2-4c3a-4a8b-b5a3-8e5c122240317";

    #[test]
    fn parses_date_and_depth() {
        let id = CrashId::parse(SAMPLE).unwrap();
        assert_eq!(id.date(), NaiveDate::from_ymd_opt(2024, 3, 17));
        assert_eq!(id.depth(), Some(2));
    }

    #[test]
    fn radix_uses_leading_pairs() {
        let id = CrashId::parse(SAMPLE).unwrap();
        assert_eq!(id.radix(2), vec!["de", "11"]);
        assert_eq!(id.radix(0), Vec::<&str>::new());
    }

    #[test]
    fn short_id_has_no_suffix() {
        let id = CrashId::parse("abc123").unwrap();
        assert_eq!(id.date(), None);
        assert_eq!(id.depth(), None);
        assert_eq!(id.radix_source(), "abc123");
        assert_eq!(id.radix(4), vec!["ab", "c1", "23"]);
    }

    #[test]
    fn impossible_date_is_none() {
        let id = CrashId::parse("ffffffff2241399").unwrap();
        assert_eq!(id.depth(), Some(2));
        assert_eq!(id.date(), None);
        // Without a valid suffix the whole id feeds the radix.
        assert_eq!(id.radix_source(), "ffffffff2241399");
    }

    #[test]
    fn rejects_unsafe_ids() {
        for bad in ["", ".hidden", "a/b", "a\\b", "a..b", "with space", "nul\0", "tab\t"] {
            assert!(
                matches!(CrashId::parse(bad), Err(TypeError::InvalidCrashId { .. })),
                "{bad:?} should be rejected"
            );
        }
        let long = "a".repeat(MAX_ID_LEN + 1);
        assert!(CrashId::parse(&long).is_err());
    }

    #[test]
    fn generate_rejects_wide_depth() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(CrashId::generate(date, 10), Err(TypeError::InvalidDepth(10)));
    }

    #[test]
    fn serde_validates() {
        let id: CrashId = serde_json::from_str(&format!("\"{SAMPLE}\"")).unwrap();
        assert_eq!(id.as_str(), SAMPLE);
        assert!(serde_json::from_str::<CrashId>("\"../etc\"").is_err());
    }

    #[test]
    fn display_is_raw_string() {
        let id = CrashId::parse("abc123").unwrap();
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(format!("{id:?}"), "CrashId(abc123)");
    }

    proptest! {
        #[test]
        fn generated_ids_roundtrip(
            year in 2000i32..2100,
            month in 1u32..=12,
            day in 1u32..=28,
            depth in 0u8..=9,
        ) {
            let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
            let id = CrashId::generate(date, depth).unwrap();
            let reparsed = CrashId::parse(id.as_str()).unwrap();
            prop_assert_eq!(reparsed.date(), Some(date));
            prop_assert_eq!(reparsed.depth(), Some(depth));
            prop_assert_eq!(reparsed.radix(depth).len(), depth as usize);
        }
    }
}
