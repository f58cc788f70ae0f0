use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name under which the primary dump of a crash is stored.
pub const DEFAULT_DUMP_NAME: &str = "upload_file_minidump";

/// As-submitted crash metadata: an arbitrary JSON object.
pub type RawCrash = serde_json::Map<String, serde_json::Value>;

/// Analysis result derived from a raw crash and its dumps.
pub type ProcessedCrash = serde_json::Map<String, serde_json::Value>;

/// Named binary dumps belonging to one crash.
///
/// Names are kept sorted so listings and serialized forms are stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpMap(BTreeMap<String, Vec<u8>>);

impl DumpMap {
    /// Create an empty dump map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// A map holding a single dump under [`DEFAULT_DUMP_NAME`].
    pub fn single(data: impl Into<Vec<u8>>) -> Self {
        let mut map = Self::new();
        map.insert(DEFAULT_DUMP_NAME, data);
        map
    }

    /// Insert (or replace) a dump. Returns the previous contents, if any.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.0.insert(name.into(), data.into())
    }

    /// Look up a dump by name.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// The primary dump, if present.
    pub fn default_dump(&self) -> Option<&[u8]> {
        self.get(DEFAULT_DUMP_NAME)
    }

    /// Iterate over `(name, bytes)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Dump names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of dumps.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no dumps.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total size of all dumps in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.0.values().map(|v| v.len() as u64).sum()
    }
}

impl From<BTreeMap<String, Vec<u8>>> for DumpMap {
    fn from(map: BTreeMap<String, Vec<u8>>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Vec<u8>)> for DumpMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DumpMap {
    type Item = (String, Vec<u8>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
