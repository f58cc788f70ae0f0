use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crashkit_types::DEFAULT_DUMP_NAME;

use crate::error::{StoreError, StoreResult};
use crate::redact::DEFAULT_FORBIDDEN_KEYS;

/// Configuration for the filesystem radix stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Root directory holding one sub-directory per date.
    pub storage_root: PathBuf,
    /// Secondary root tried when a save to `storage_root` fails.
    pub fallback_root: Option<PathBuf>,
    /// How many fallback stores a save may try after the primary.
    pub fallback_depth: usize,
    /// Directory name of the name tree under each date.
    pub name_branch_base: String,
    /// Directory name of the date tree under each date.
    pub date_branch_base: String,
    /// Suffix of raw metadata files.
    pub json_file_suffix: String,
    /// Suffix of gzip processed files.
    pub jsonz_file_suffix: String,
    /// Suffix of dump files.
    pub dump_file_suffix: String,
    /// Name under which the default dump is stored.
    pub dump_field: String,
    /// Radix depth for ids that do not encode one.
    pub radix_depth: u8,
    /// Maximum entries in one slot directory before overflow buckets are used.
    pub dump_dir_count: usize,
    /// Width of one date-tree slot in seconds.
    pub minute_slice_interval: u32,
    /// Also leave the slot before the current one alone while scanning.
    pub skip_previous_slot: bool,
    /// Process umask applied while creating directories and links.
    pub umask: u32,
    /// Mode bits for created directories.
    pub dir_permissions: u32,
    /// Mode bits for written files.
    pub dump_permissions: u32,
    /// Group that should own written files.
    pub dump_gid: Option<u32>,
    /// Key paths removed from processed records on redacted reads.
    pub forbidden_keys: Vec<String>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./crashes"),
            fallback_root: None,
            fallback_depth: 1,
            name_branch_base: "name".into(),
            date_branch_base: "date".into(),
            json_file_suffix: ".json".into(),
            jsonz_file_suffix: ".jsonz".into(),
            dump_file_suffix: ".dump".into(),
            dump_field: DEFAULT_DUMP_NAME.into(),
            radix_depth: 2,
            dump_dir_count: 1024,
            minute_slice_interval: 4,
            skip_previous_slot: false,
            umask: 0o022,
            dir_permissions: 0o755,
            dump_permissions: 0o660,
            dump_gid: None,
            forbidden_keys: DEFAULT_FORBIDDEN_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl FsConfig {
    /// A default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Default::default()
        }
    }

    /// Reject settings the stores cannot work with.
    pub fn validate(&self) -> StoreResult<()> {
        if !(1..=60).contains(&self.minute_slice_interval) {
            return Err(StoreError::Config(format!(
                "minute_slice_interval must be between 1 and 60 seconds, got {}",
                self.minute_slice_interval
            )));
        }
        if self.dump_dir_count == 0 {
            return Err(StoreError::Config("dump_dir_count must be positive".into()));
        }
        if self.radix_depth > 9 {
            return Err(StoreError::Config(format!(
                "radix_depth must be a single digit, got {}",
                self.radix_depth
            )));
        }
        for (field, value) in [
            ("name_branch_base", &self.name_branch_base),
            ("date_branch_base", &self.date_branch_base),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(StoreError::Config(format!(
                    "{field} must be a single path component, got {value:?}"
                )));
            }
        }
        if self.name_branch_base == self.date_branch_base {
            return Err(StoreError::Config(
                "name_branch_base and date_branch_base must differ".into(),
            ));
        }
        let suffixes = [
            &self.json_file_suffix,
            &self.jsonz_file_suffix,
            &self.dump_file_suffix,
        ];
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(StoreError::Config("file suffixes must not be empty".into()));
        }
        if suffixes[0] == suffixes[1] || suffixes[0] == suffixes[2] || suffixes[1] == suffixes[2] {
            return Err(StoreError::Config("file suffixes must be distinct".into()));
        }
        Ok(())
    }
}

/// Which store to build, and how.
///
/// Deserializes from a tagged table, e.g.
///
/// ```toml
/// kind = "fs_dated_radix"
/// storage_root = "/var/crashes"
/// minute_slice_interval = 4
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Name tree only. `enumerate_new` finds nothing.
    FsRadix(FsConfig),
    /// Name tree plus the dated slot index.
    FsDatedRadix(FsConfig),
    /// Process-local store for tests and embedding.
    Memory,
    /// Accepts every save and finds nothing.
    Null,
    /// Try `stores` in order until one save succeeds.
    Fallback {
        stores: Vec<BackendConfig>,
        #[serde(default = "default_fallback_depth")]
        depth: usize,
    },
    /// Save to every member; read from the first.
    Poly { stores: Vec<BackendConfig> },
}

fn default_fallback_depth() -> usize {
    1
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::FsDatedRadix(FsConfig::default())
    }
}
