use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CrashIdStream, CrashStore};

/// Discards every save and finds nothing.
///
/// Useful as the destination of a dry-run mover, or as a placeholder in a
/// fan-out configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCrashStore;

impl NullCrashStore {
    pub fn new() -> Self {
        Self
    }
}

impl CrashStore for NullCrashStore {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn save_raw(&self, id: &CrashId, _raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        trace!(crash_id = %id, dumps = dumps.len(), "discarding raw crash");
        Ok(())
    }

    fn save_processed(&self, id: &CrashId, _processed: &ProcessedCrash) -> StoreResult<()> {
        trace!(crash_id = %id, "discarding processed crash");
        Ok(())
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        Err(StoreError::NotFound(id.clone()))
    }

    fn get_dump(&self, id: &CrashId, _name: Option<&str>) -> StoreResult<Vec<u8>> {
        Err(StoreError::NotFound(id.clone()))
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        Err(StoreError::NotFound(id.clone()))
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        Err(StoreError::NotFound(id.clone()))
    }

    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        Err(StoreError::NotFound(id.clone()))
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        Ok(Box::new(std::iter::empty()))
    }
}
