//! Ordered failover between stores.
//!
//! Saves go to the first store. When it fails with a retryable error the
//! next one is tried, up to `depth` fallbacks. Non-retryable failures
//! (bad id, corrupt data) are returned straight away since another store
//! would reject the same input.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, warn};

use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash};

use crate::error::{StoreError, StoreResult};
use crate::traits::{CrashIdStream, CrashStore};

pub struct FallbackCrashStore {
    stores: Vec<Arc<dyn CrashStore>>,
    depth: usize,
}

impl FallbackCrashStore {
    /// Chain `stores`, primary first. A save tries at most `depth`
    /// stores after the primary.
    pub fn new(stores: Vec<Arc<dyn CrashStore>>, depth: usize) -> StoreResult<Self> {
        if stores.is_empty() {
            return Err(StoreError::Config(
                "fallback store needs at least one member".into(),
            ));
        }
        Ok(Self { stores, depth })
    }

    /// Members in the order they are tried.
    pub fn stores(&self) -> &[Arc<dyn CrashStore>] {
        &self.stores
    }

    fn save_with(
        &self,
        id: &CrashId,
        operation: &str,
        save: impl Fn(&dyn CrashStore) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut last_err = None;
        for (n, store) in self.stores.iter().take(self.depth + 1).enumerate() {
            match save(store.as_ref()) {
                Ok(()) => {
                    if let Some(e) = last_err {
                        warn!(
                            crash_id = %id,
                            operation,
                            store = store.kind(),
                            attempt = n + 1,
                            error = %e,
                            "save succeeded on fallback store"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(crash_id = %id, operation, store = store.kind(), error = %e, "save failed, trying next store");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        // `stores` is never empty, so at least one attempt was made.
        let e = last_err.unwrap_or_else(|| StoreError::Config("no store attempted".into()));
        error!(crash_id = %id, operation, error = %e, "save failed on every store");
        Err(e)
    }

    /// Try each member until one has the crash.
    fn read_with<T>(
        &self,
        read: impl Fn(&dyn CrashStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut not_found = None;
        let mut failure = None;
        for store in &self.stores {
            match read(store.as_ref()) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_not_found() => not_found = not_found.or(Some(e)),
                Err(e) if e.is_retryable() || matches!(e, StoreError::Unsupported { .. }) => {
                    failure = Some(e)
                }
                Err(e) => return Err(e),
            }
        }
        Err(failure
            .or(not_found)
            .unwrap_or_else(|| StoreError::Config("no store attempted".into())))
    }
}

impl CrashStore for FallbackCrashStore {
    fn kind(&self) -> &'static str {
        "fallback"
    }

    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        self.save_with(id, "save_raw", |store| store.save_raw(id, raw, dumps))
    }

    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()> {
        self.save_with(id, "save_processed", |store| {
            store.save_processed(id, processed)
        })
    }

    fn save_raw_and_processed(
        &self,
        id: &CrashId,
        raw: &RawCrash,
        dumps: &DumpMap,
        processed: &ProcessedCrash,
    ) -> StoreResult<()> {
        self.save_with(id, "save_raw_and_processed", |store| {
            store.save_raw_and_processed(id, raw, dumps, processed)
        })
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        self.read_with(|store| store.get_raw(id))
    }

    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>> {
        self.read_with(|store| store.get_dump(id, name))
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        self.read_with(|store| store.get_dumps(id))
    }

    fn get_dumps_as_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        self.read_with(|store| store.get_dumps_as_files(id))
    }

    fn get_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        self.read_with(|store| store.get_processed(id))
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        self.read_with(|store| store.get_unredacted_processed(id))
    }

    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        let mut removed = false;
        let mut failure = None;
        for store in &self.stores {
            match store.remove(id) {
                Ok(()) => removed = true,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(crash_id = %id, store = store.kind(), error = %e, "remove failed");
                    failure.get_or_insert(e);
                }
            }
        }
        match (removed, failure) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Err(StoreError::NotFound(id.clone())),
        }
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        let mut streams = Vec::with_capacity(self.stores.len());
        let mut failure = None;
        for store in &self.stores {
            match store.enumerate_new() {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    warn!(store = store.kind(), error = %e, "cannot enumerate new crashes");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) if streams.is_empty() => Err(e),
            _ => Ok(Box::new(streams.into_iter().flatten())),
        }
    }

    fn mark_new(&self, id: &CrashId) -> StoreResult<()> {
        self.read_with(|store| store.mark_new(id))
    }
}

impl std::fmt::Debug for FallbackCrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCrashStore")
            .field("stores", &self.stores.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .field("depth", &self.depth)
            .finish()
    }
}
