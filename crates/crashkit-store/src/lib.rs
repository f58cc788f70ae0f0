//! Crash storage for crashkit.
//!
//! A crash is a raw metadata document plus zero or more named binary dumps,
//! and later a processed record. This crate persists them and lets
//! consumers discover crashes that arrived since they last looked.
//!
//! # Storage Backends
//!
//! All backends implement the [`CrashStore`] trait:
//!
//! - [`FsRadixStore`] -- one directory per crash, sharded by date and id prefix
//! - [`FsDatedRadixStore`] -- the same, plus a time-slotted index of new crashes
//! - [`InMemoryCrashStore`] -- `HashMap`-based store for tests and embedding
//! - [`NullCrashStore`] -- accepts everything, finds nothing
//! - [`FallbackCrashStore`] -- ordered failover on retryable errors
//! - [`PolyCrashStore`] -- fan-out saves to several stores
//!
//! [`open_store`] builds any of these from a [`BackendConfig`].
//!
//! # Design Rules
//!
//! 1. Identifiers are validated before any path is built from them.
//! 2. Dumps are written before metadata; metadata marks a complete record.
//! 3. Every file is written to a temporary name and renamed into place.
//! 4. A crash is never reported as new while its slot can still be written.
//! 5. Index bookkeeping failures are logged, never surfaced to the saver.

pub mod backend;
pub mod config;
pub mod date_index;
pub mod error;
pub mod fallback;
pub mod fs;
pub mod memory;
pub mod null;
pub mod perms;
pub mod poly;
pub mod radix;
pub mod redact;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export primary types at crate root for ergonomic imports.
pub use backend::{open_store, open_store_with_clock};
pub use config::{BackendConfig, FsConfig};
pub use date_index::{DateIndex, SlotKey};
pub use error::{StoreError, StoreResult};
pub use fallback::FallbackCrashStore;
pub use fs::{FsDatedRadixStore, FsRadixStore};
pub use memory::InMemoryCrashStore;
pub use null::NullCrashStore;
pub use poly::PolyCrashStore;
pub use radix::RadixLayout;
pub use redact::{Redactor, DEFAULT_FORBIDDEN_KEYS};
pub use traits::{CrashIdStream, CrashStore};
