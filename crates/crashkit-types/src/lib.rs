//! Foundation types for crashkit.
//!
//! This crate provides the identifier, record, and clock types shared by the
//! storage engine, the task engine, and the mover. Every other crashkit crate
//! depends on `crashkit-types`.
//!
//! # Key Types
//!
//! - [`CrashId`]: Crash identifier with an embedded creation date and radix depth
//! - [`RawCrash`]: As-submitted crash metadata (a JSON object)
//! - [`DumpMap`]: Named binary dumps belonging to one crash
//! - [`ProcessedCrash`]: Derived analysis document
//! - [`Clock`]: Source of "now" for date bucketing ([`SystemClock`], [`ManualClock`])

pub mod crash_id;
pub mod error;
pub mod record;
pub mod temporal;

pub use crash_id::{CrashId, DEFAULT_DEPTH, MAX_ID_LEN};
pub use error::TypeError;
pub use record::{DumpMap, ProcessedCrash, RawCrash, DEFAULT_DUMP_NAME};
pub use temporal::{Clock, ManualClock, SystemClock};
