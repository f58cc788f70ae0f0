//! Radix path mapping for the name tree.
//!
//! Every crash lives in its own directory:
//!
//! ```text
//! <root>/<YYYYMMDD>/<name_branch_base>/<r1>/.../<rN>/<crash_id>/
//!     <crash_id>.json                raw metadata
//!     <crash_id>.dump                default dump
//!     <crash_id>.<name>.dump         additional named dumps
//!     <crash_id>.jsonz               gzip processed record
//!     date_root -> ../../../../../<YYYYMMDD>/date/HH/MM_SS   (dated stores only)
//! ```
//!
//! `r1..rN` are the leading two-character groups of the id; `N` is the
//! depth digit encoded in the id, or the configured default.
//!
//! Ids with an embedded date always live under that date. Undated ids are
//! filed under the day they were first saved, so their entry is looked up
//! on disk rather than derived from the clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use walkdir::WalkDir;

use crashkit_types::{Clock, CrashId, SystemClock};

use crate::config::FsConfig;

/// Name of the back link from a name-tree entry to its date slot.
pub const DATE_ROOT_LINK: &str = "date_root";

/// Deterministic mapping from crash ids to paths.
#[derive(Clone, Debug)]
pub struct RadixLayout {
    root: PathBuf,
    name_branch_base: String,
    json_suffix: String,
    jsonz_suffix: String,
    dump_suffix: String,
    dump_field: String,
    default_depth: u8,
    clock: Arc<dyn Clock>,
}

impl RadixLayout {
    /// Build a layout from configuration, using the system clock.
    pub fn new(config: &FsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a layout that reads "today" from `clock`.
    pub fn with_clock(config: &FsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: config.storage_root.clone(),
            name_branch_base: config.name_branch_base.clone(),
            json_suffix: config.json_file_suffix.clone(),
            jsonz_suffix: config.jsonz_file_suffix.clone(),
            dump_suffix: config.dump_file_suffix.clone(),
            dump_field: config.dump_field.clone(),
            default_depth: config.radix_depth,
            clock,
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The clock used for ids without an embedded date.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Date a crash is filed under.
    pub fn date_of(&self, id: &CrashId) -> NaiveDate {
        self.locate(id).0
    }

    /// Date and entry directory of a crash.
    ///
    /// An undated id is searched for under today first, then under every
    /// other date directory, newest first. An undated id that is not on
    /// disk yet maps to today.
    pub fn locate(&self, id: &CrashId) -> (NaiveDate, PathBuf) {
        if let Some(date) = id.date() {
            return (date, self.entry_dir_on(id, date));
        }
        let today = self.clock.now().date_naive();
        let fresh = self.entry_dir_on(id, today);
        if fresh.is_dir() {
            return (today, fresh);
        }
        self.stored_dates()
            .into_iter()
            .rev()
            .filter(|date| *date != today)
            .map(|date| (date, self.entry_dir_on(id, date)))
            .find(|(_, dir)| dir.is_dir())
            .unwrap_or((today, fresh))
    }

    /// Dates that have a directory under the root, oldest first.
    pub fn stored_dates(&self) -> Vec<NaiveDate> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_dir() => entry
                    .file_name()
                    .to_str()
                    .and_then(|name| NaiveDate::parse_from_str(name, "%Y%m%d").ok()),
                Ok(_) => None,
                Err(e) => {
                    debug!(path = %self.root.display(), error = %e, "cannot list storage root");
                    None
                }
            })
            .collect()
    }

    /// `<root>/<YYYYMMDD>` for the crash.
    pub fn date_dir(&self, id: &CrashId) -> PathBuf {
        self.date_dir_for(self.date_of(id))
    }

    /// `<root>/<YYYYMMDD>` for an arbitrary date.
    pub fn date_dir_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(self.date_dir_name(date))
    }

    /// `YYYYMMDD` directory name of a date.
    pub fn date_dir_name(&self, date: NaiveDate) -> String {
        date.format("%Y%m%d").to_string()
    }

    /// Radix segments of the crash.
    pub fn radix<'a>(&self, id: &'a CrashId) -> Vec<&'a str> {
        id.radix(id.depth().unwrap_or(self.default_depth))
    }

    /// The crash's own directory in the name tree.
    pub fn entry_dir(&self, id: &CrashId) -> PathBuf {
        self.locate(id).1
    }

    /// The crash's directory if it were filed under `date`.
    pub fn entry_dir_on(&self, id: &CrashId, date: NaiveDate) -> PathBuf {
        self.date_dir_for(date).join(self.entry_dir_from_date(id))
    }

    /// Path of the entry relative to its date directory.
    pub fn entry_dir_from_date(&self, id: &CrashId) -> PathBuf {
        let mut path = PathBuf::from(&self.name_branch_base);
        for segment in self.radix(id) {
            path.push(segment);
        }
        path.push(id.as_str());
        path
    }

    /// Number of path components between the date directory and the entry.
    pub fn entry_depth_below_date(&self, id: &CrashId) -> usize {
        self.radix(id).len() + 2
    }

    /// File name of the raw metadata.
    pub fn raw_file_name(&self, id: &CrashId) -> String {
        format!("{id}{}", self.json_suffix)
    }

    /// File name of the processed record.
    pub fn processed_file_name(&self, id: &CrashId) -> String {
        format!("{id}{}", self.jsonz_suffix)
    }

    /// File name of a dump. `None`, `"dump"` and the configured default
    /// dump name all map to the default dump file.
    pub fn dump_file_name(&self, id: &CrashId, name: Option<&str>) -> String {
        match name {
            None => format!("{id}{}", self.dump_suffix),
            Some(n) if n == "dump" || n == self.dump_field => format!("{id}{}", self.dump_suffix),
            Some(n) => format!("{id}.{n}{}", self.dump_suffix),
        }
    }

    /// Inverse of [`dump_file_name`](Self::dump_file_name): the dump name
    /// stored in `file_name`, or `None` if it is not a dump of `id`.
    pub fn dump_name_from_file(&self, id: &CrashId, file_name: &str) -> Option<String> {
        let rest = file_name.strip_prefix(id.as_str())?;
        let stem = rest.strip_suffix(&self.dump_suffix)?;
        if stem.is_empty() {
            Some(self.dump_field.clone())
        } else {
            stem.strip_prefix('.')
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        }
    }

    /// Full path of the raw metadata file.
    pub fn raw_path(&self, id: &CrashId) -> PathBuf {
        self.entry_dir(id).join(self.raw_file_name(id))
    }

    /// Full path of the processed record.
    pub fn processed_path(&self, id: &CrashId) -> PathBuf {
        self.entry_dir(id).join(self.processed_file_name(id))
    }

    /// Full path of a dump.
    pub fn dump_path(&self, id: &CrashId, name: Option<&str>) -> PathBuf {
        self.entry_dir(id).join(self.dump_file_name(id, name))
    }

    /// Full path of the date-tree back link.
    pub fn date_root_path(&self, id: &CrashId) -> PathBuf {
        self.entry_dir(id).join(DATE_ROOT_LINK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crashkit_types::ManualClock;

    const ID: &str = "de1144f2-4c3a-4a8b-b5a3-8e5c122240317";

    fn layout() -> RadixLayout {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        RadixLayout::with_clock(&FsConfig::with_root("/crashes"), Arc::new(clock))
    }

    #[test]
    fn entry_dir_uses_embedded_date_and_depth() {
        let id = CrashId::parse(ID).unwrap();
        assert_eq!(
            layout().entry_dir(&id),
            PathBuf::from(format!("/crashes/20240317/name/de/11/{ID}"))
        );
        assert_eq!(layout().entry_depth_below_date(&id), 4);
    }

    #[test]
    fn undated_id_uses_clock_and_default_depth() {
        let id = CrashId::parse("abc123").unwrap();
        assert_eq!(
            layout().entry_dir(&id),
            PathBuf::from("/crashes/20240501/name/ab/c1/abc123")
        );
    }

    #[test]
    fn undated_id_is_found_under_an_earlier_date() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let layout = RadixLayout::with_clock(&FsConfig::with_root(tmp.path()), Arc::new(clock));
        let id = CrashId::parse("abc123").unwrap();
        let april = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        std::fs::create_dir_all(layout.entry_dir_on(&id, april)).unwrap();
        std::fs::create_dir_all(tmp.path().join("not-a-date")).unwrap();

        assert_eq!(layout.locate(&id), (april, layout.entry_dir_on(&id, april)));
        assert_eq!(layout.date_of(&id), april);

        let other = CrashId::parse("ffee99").unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(layout.locate(&other).0, today);
    }

    #[test]
    fn depth_digit_overrides_default() {
        let id = CrashId::parse("aabbccdd0240317").unwrap();
        assert_eq!(
            layout().entry_dir_from_date(&id),
            PathBuf::from("name/aabbccdd0240317")
        );
    }

    #[test]
    fn dump_names_roundtrip_through_file_names() {
        let layout = layout();
        let id = CrashId::parse("abc123").unwrap();
        assert_eq!(layout.dump_file_name(&id, None), "abc123.dump");
        assert_eq!(layout.dump_file_name(&id, Some("dump")), "abc123.dump");
        assert_eq!(layout.dump_file_name(&id, Some("upload_file_minidump")), "abc123.dump");
        assert_eq!(layout.dump_file_name(&id, Some("flash1")), "abc123.flash1.dump");

        assert_eq!(
            layout.dump_name_from_file(&id, "abc123.dump").as_deref(),
            Some("upload_file_minidump")
        );
        assert_eq!(
            layout.dump_name_from_file(&id, "abc123.flash1.dump").as_deref(),
            Some("flash1")
        );
        assert_eq!(layout.dump_name_from_file(&id, "abc123.json"), None);
        assert_eq!(layout.dump_name_from_file(&id, "abc123..dump"), None);
        assert_eq!(layout.dump_name_from_file(&id, "other.dump"), None);
    }

    #[test]
    fn record_paths() {
        let layout = layout();
        let id = CrashId::parse("abc123").unwrap();
        let dir = layout.entry_dir(&id);
        assert_eq!(layout.raw_path(&id), dir.join("abc123.json"));
        assert_eq!(layout.processed_path(&id), dir.join("abc123.jsonz"));
        assert_eq!(layout.date_root_path(&id), dir.join("date_root"));
    }
}
