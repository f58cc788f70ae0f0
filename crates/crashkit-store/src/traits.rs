use std::collections::BTreeMap;
use std::path::PathBuf;

use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash};

use crate::error::{StoreError, StoreResult};
use crate::redact::Redactor;

/// Lazy, finite sequence of crash ids produced by one enumeration call.
///
/// The stream owns everything it needs, so it can be moved onto another
/// thread and outlive the borrow of the store that created it.
pub type CrashIdStream = Box<dyn Iterator<Item = CrashId> + Send>;

/// Storage backend for raw and processed crash records.
///
/// All implementations must satisfy these invariants:
/// - A save either fully succeeds or returns an error. Leftover files from a
///   failed save are reconciled by the next save of the same id.
/// - Reads of a crash with no record fail with [`StoreError::NotFound`];
///   a missing named dump fails with [`StoreError::DumpNotFound`].
/// - `remove` is not idempotent: removing a missing crash fails with
///   [`StoreError::NotFound`].
/// - `enumerate_new` never yields an id twice within one call unless the
///   crash was saved again after being handed out, and never yields an id
///   whose files may still be in the middle of being written.
pub trait CrashStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Save (or overwrite) the raw record and dumps of a crash.
    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()>;

    /// Save (or overwrite) the processed record of a crash.
    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()>;

    /// Save raw and processed records together.
    ///
    /// Default implementation saves the raw record first and stops at the
    /// first failure.
    fn save_raw_and_processed(
        &self,
        id: &CrashId,
        raw: &RawCrash,
        dumps: &DumpMap,
        processed: &ProcessedCrash,
    ) -> StoreResult<()> {
        self.save_raw(id, raw, dumps)?;
        self.save_processed(id, processed)
    }

    /// Fetch the raw metadata of a crash.
    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash>;

    /// Fetch one dump. `None` selects the default dump.
    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>>;

    /// Fetch every dump of a crash.
    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap>;

    /// Paths of every dump file of a crash, for consumers that need files.
    fn get_dumps_as_files(&self, id: &CrashId) -> StoreResult<BTreeMap<String, PathBuf>> {
        let _ = id;
        Err(StoreError::Unsupported {
            backend: self.kind(),
            operation: "get_dumps_as_files",
        })
    }

    /// Fetch the processed record with sensitive fields removed.
    fn get_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        let mut processed = self.get_unredacted_processed(id)?;
        self.redactor().redact(&mut processed);
        Ok(processed)
    }

    /// Fetch the processed record exactly as saved.
    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash>;

    /// Redaction rules applied by [`get_processed`](Self::get_processed).
    fn redactor(&self) -> &Redactor {
        Redactor::default_ref()
    }

    /// Delete every record of a crash.
    fn remove(&self, id: &CrashId) -> StoreResult<()>;

    /// Crash ids that arrived since the last call and are safe to read.
    fn enumerate_new(&self) -> StoreResult<CrashIdStream>;

    /// Put an already stored crash back among the new ones, so a later
    /// [`enumerate_new`](Self::enumerate_new) yields it again.
    fn mark_new(&self, id: &CrashId) -> StoreResult<()> {
        let _ = id;
        Err(StoreError::Unsupported {
            backend: self.kind(),
            operation: "mark_new",
        })
    }
}

impl std::fmt::Debug for dyn CrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashStore")
            .field("kind", &self.kind())
            .finish()
    }
}
