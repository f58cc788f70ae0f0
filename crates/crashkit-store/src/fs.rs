//! Filesystem radix-tree stores.
//!
//! [`FsRadixStore`] keeps every crash in its own name-tree directory (see
//! [`crate::radix`]). [`FsDatedRadixStore`] adds the dated slot index on
//! top so newly saved crashes can be enumerated without walking the name
//! tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use chrono::NaiveDate;
use flate2::Compression;
use tracing::{debug, info};
use walkdir::WalkDir;

use crashkit_types::{Clock, CrashId, DumpMap, ProcessedCrash, RawCrash, SystemClock};

use crate::config::FsConfig;
use crate::date_index::DateIndex;
use crate::error::{StoreError, StoreResult};
use crate::perms::FilePolicy;
use crate::radix::RadixLayout;
use crate::redact::Redactor;
use crate::traits::{CrashIdStream, CrashStore};

/// Name-tree store without a new-crash index.
///
/// `enumerate_new` always yields nothing; use [`FsDatedRadixStore`] for
/// stores that feed a processing pipeline.
#[derive(Clone, Debug)]
pub struct FsRadixStore {
    layout: Arc<RadixLayout>,
    policy: FilePolicy,
    redactor: Redactor,
}

impl FsRadixStore {
    /// Open a store with the system clock.
    pub fn new(config: &FsConfig) -> StoreResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open a store that reads "now" from `clock`.
    pub fn with_clock(config: &FsConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            layout: Arc::new(RadixLayout::with_clock(config, clock)),
            policy: FilePolicy::from_config(config),
            redactor: Redactor::new(config.forbidden_keys.iter().cloned()),
        })
    }

    /// Path mapping used by this store.
    pub fn layout(&self) -> &Arc<RadixLayout> {
        &self.layout
    }

    /// Entry directory of a crash that must already exist.
    fn existing_entry(&self, id: &CrashId) -> StoreResult<PathBuf> {
        let (_, dir) = self.layout.locate(id);
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StoreError::corrupt(&dir, "name-tree entry is not a directory")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.clone())),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    /// Dump files of an existing entry, keyed by dump name.
    fn dump_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        let dir = self.existing_entry(id)?;
        self.dump_files_in(id, &dir)
    }

    fn dump_files_in(&self, id: &CrashId, dir: &Path) -> StoreResult<BTreeMap<String, PathBuf>> {
        let mut found = BTreeMap::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                StoreError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if let Some(name) = self.layout.dump_name_from_file(id, file_name) {
                found.insert(name, entry.into_path());
            }
        }
        Ok(found)
    }

    /// Write the raw record, replacing any earlier save of the same id.
    /// Returns the date and directory the crash is filed under.
    fn write_raw(
        &self,
        id: &CrashId,
        raw: &RawCrash,
        dumps: &DumpMap,
    ) -> StoreResult<(NaiveDate, PathBuf)> {
        let (date, dir) = self.layout.locate(id);
        self.policy.create_dirs(&dir)?;

        let keep: BTreeSet<String> = dumps
            .names()
            .map(|name| self.layout.dump_file_name(id, Some(name)))
            .collect();
        for (name, path) in self.dump_files_in(id, &dir)? {
            let stale = path
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| !keep.contains(f));
            if !stale {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(crash_id = %id, dump = %name, "removed stale dump"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        // Dumps first, metadata last: readers treat the metadata file as
        // the marker of a complete record.
        for (name, data) in dumps.iter() {
            self.policy
                .write_file(&dir.join(self.layout.dump_file_name(id, Some(name))), data)?;
        }
        let raw_path = dir.join(self.layout.raw_file_name(id));
        let json =
            serde_json::to_vec(raw).map_err(|e| StoreError::corrupt(&raw_path, e.to_string()))?;
        self.policy.write_file(&raw_path, &json)?;

        debug!(crash_id = %id, dumps = dumps.len(), path = %dir.display(), "saved raw crash");
        Ok((date, dir))
    }
}

fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

impl CrashStore for FsRadixStore {
    fn kind(&self) -> &'static str {
        "fs_radix"
    }

    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        self.write_raw(id, raw, dumps).map(|_| ())
    }

    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()> {
        let (_, dir) = self.layout.locate(id);
        let path = dir.join(self.layout.processed_file_name(id));
        self.policy.create_dirs(&dir)?;

        let json = serde_json::to_vec(processed)
            .map_err(|e| StoreError::corrupt(&path, e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| StoreError::io(&path, e))?;
        let compressed = encoder.finish().map_err(|e| StoreError::io(&path, e))?;
        self.policy.write_file(&path, &compressed)?;

        debug!(crash_id = %id, path = %path.display(), "saved processed crash");
        Ok(())
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        let path = self.layout.raw_path(id);
        let bytes = match read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }

    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>> {
        let path = self
            .existing_entry(id)?
            .join(self.layout.dump_file_name(id, name));
        match read_file(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::DumpNotFound {
                id: id.clone(),
                name: name.unwrap_or("dump").to_string(),
            }),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        self.dump_files(id)?
            .into_iter()
            .map(|(name, path)| {
                read_file(&path)
                    .map(|bytes| (name, bytes))
                    .map_err(|e| StoreError::io(&path, e))
            })
            .collect()
    }

    fn get_dumps_as_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        self.dump_files(id)
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        let path = self.layout.processed_path(id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let mut json = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut json)
            .map_err(|e| StoreError::corrupt(&path, format!("bad gzip stream: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }

    fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        let dir = self.existing_entry(id)?;
        fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!(crash_id = %id, "removed crash");
        Ok(())
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Name-tree store with the dated slot index.
///
/// Raw saves are registered in the current date slot; `enumerate_new`
/// drains every slot older than the current one.
#[derive(Clone, Debug)]
pub struct FsDatedRadixStore {
    inner: FsRadixStore,
    index: DateIndex,
}

impl FsDatedRadixStore {
    /// Open a store with the system clock.
    pub fn new(config: &FsConfig) -> StoreResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open a store that reads "now" from `clock`.
    pub fn with_clock(config: &FsConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let inner = FsRadixStore::with_clock(config, clock)?;
        let index = DateIndex::new(Arc::clone(inner.layout()), config);
        Ok(Self { inner, index })
    }

    /// Path mapping used by this store.
    pub fn layout(&self) -> &Arc<RadixLayout> {
        self.inner.layout()
    }

    /// The date index, for inspecting slots.
    pub fn index(&self) -> &DateIndex {
        &self.index
    }
}

impl CrashStore for FsDatedRadixStore {
    fn kind(&self) -> &'static str {
        "fs_dated_radix"
    }

    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        let (date, _) = self.inner.write_raw(id, raw, dumps)?;
        self.index.link(id, date);
        Ok(())
    }

    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()> {
        self.inner.save_processed(id, processed)
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        self.inner.get_raw(id)
    }

    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>> {
        self.inner.get_dump(id, name)
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        self.inner.get_dumps(id)
    }

    fn get_dumps_as_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        self.inner.get_dumps_as_files(id)
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        self.inner.get_unredacted_processed(id)
    }

    fn redactor(&self) -> &Redactor {
        self.inner.redactor()
    }

    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        let dir = self.inner.existing_entry(id)?;
        self.index.unlink(id, &dir);
        self.inner.remove(id)
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        Ok(self.index.scan())
    }

    fn mark_new(&self, id: &CrashId) -> StoreResult<()> {
        let (date, dir) = self.layout().locate(id);
        if !dir.join(self.layout().raw_file_name(id)).is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.index.link(id, date);
        Ok(())
    }
}
