//! Store doubles shared by the unit tests.

use std::io;

use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash};

use crate::error::{StoreError, StoreResult};
use crate::traits::{CrashIdStream, CrashStore};

/// A store whose every operation fails the same way.
#[derive(Debug)]
pub struct FailingStore {
    retryable: bool,
}

impl FailingStore {
    pub fn unavailable() -> Self {
        Self { retryable: true }
    }

    pub fn corrupt() -> Self {
        Self { retryable: false }
    }

    fn fail<T>(&self) -> StoreResult<T> {
        if self.retryable {
            Err(StoreError::io("/failing", io::Error::other("disk unavailable")))
        } else {
            Err(StoreError::corrupt("/failing", "garbage on disk"))
        }
    }
}

impl CrashStore for FailingStore {
    fn kind(&self) -> &'static str {
        "failing"
    }

    fn save_raw(&self, _: &CrashId, _: &RawCrash, _: &DumpMap) -> StoreResult<()> {
        self.fail()
    }

    fn save_processed(&self, _: &CrashId, _: &ProcessedCrash) -> StoreResult<()> {
        self.fail()
    }

    fn get_raw(&self, _: &CrashId) -> StoreResult<RawCrash> {
        self.fail()
    }

    fn get_dump(&self, _: &CrashId, _: Option<&str>) -> StoreResult<Vec<u8>> {
        self.fail()
    }

    fn get_dumps(&self, _: &CrashId) -> StoreResult<DumpMap> {
        self.fail()
    }

    fn get_unredacted_processed(&self, _: &CrashId) -> StoreResult<ProcessedCrash> {
        self.fail()
    }

    fn remove(&self, _: &CrashId) -> StoreResult<()> {
        self.fail()
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        self.fail()
    }
}
