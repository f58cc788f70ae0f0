//! Fan-out to several stores at once.
//!
//! Every save goes to every member. Reads and enumeration are served by
//! the first member only, which is treated as the authoritative copy.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash};

use crate::error::{StoreError, StoreResult};
use crate::redact::Redactor;
use crate::traits::{CrashIdStream, CrashStore};

pub struct PolyCrashStore {
    stores: Vec<Arc<dyn CrashStore>>,
}

impl PolyCrashStore {
    pub fn new(stores: Vec<Arc<dyn CrashStore>>) -> StoreResult<Self> {
        if stores.is_empty() {
            return Err(StoreError::Config(
                "poly store needs at least one member".into(),
            ));
        }
        Ok(Self { stores })
    }

    pub fn stores(&self) -> &[Arc<dyn CrashStore>] {
        &self.stores
    }

    fn primary(&self) -> &dyn CrashStore {
        self.stores[0].as_ref()
    }

    /// Run `op` on every member, even after a failure, and gather the
    /// failures into one error.
    fn fan_out(
        &self,
        id: &CrashId,
        operation: &str,
        op: impl Fn(&dyn CrashStore) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let errors: Vec<StoreError> = self
            .stores
            .iter()
            .filter_map(|store| match op(store.as_ref()) {
                Ok(()) => None,
                Err(e) => {
                    error!(crash_id = %id, operation, store = store.kind(), error = %e, "fan-out member failed");
                    Some(e)
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::FanOut {
                total: self.stores.len(),
                errors,
            })
        }
    }
}

impl CrashStore for PolyCrashStore {
    fn kind(&self) -> &'static str {
        "poly"
    }

    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        self.fan_out(id, "save_raw", |store| store.save_raw(id, raw, dumps))
    }

    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()> {
        self.fan_out(id, "save_processed", |store| {
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
        self.fan_out(id, "save_raw_and_processed", |store| {
            store.save_raw_and_processed(id, raw, dumps, processed)
        })
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        self.primary().get_raw(id)
    }

    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>> {
        self.primary().get_dump(id, name)
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        self.primary().get_dumps(id)
    }

    fn get_dumps_as_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        self.primary().get_dumps_as_files(id)
    }

    fn get_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        self.primary().get_processed(id)
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        self.primary().get_unredacted_processed(id)
    }

    fn redactor(&self) -> &Redactor {
        self.primary().redactor()
    }

    /// Removes from every member. Fails with `NotFound` only when no
    /// member had the crash.
    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        let mut removed = 0;
        let mut errors = Vec::new();
        for store in &self.stores {
            match store.remove(id) {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(StoreError::FanOut {
                total: self.stores.len(),
                errors,
            });
        }
        if removed == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        self.primary().enumerate_new()
    }

    fn mark_new(&self, id: &CrashId) -> StoreResult<()> {
        self.primary().mark_new(id)
    }
}

impl std::fmt::Debug for PolyCrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyCrashStore")
            .field("stores", &self.stores.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .finish()
    }
}
