//! Generic bounded producer/consumer engine.
//!
//! A [`TaskEngine`] pulls items from a job source on one producer thread
//! and hands them to a fixed pool of worker threads through a bounded
//! queue. It knows nothing about what the items are; the crash mover is
//! one client.
//!
//! # Design Rules
//!
//! 1. The queue is bounded; a full queue blocks the producer.
//! 2. One item's failure (error or panic) never stops the pool.
//! 3. Stopping is cooperative and idempotent; in-flight items finish.
//! 4. Each engine owns its own stop flag and threads. Nothing is global.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{TaskConfig, MAX_IDLE_DELAY_SECS};
pub use engine::{EngineState, StopHandle, TaskEngine, TaskStats, WorkerState};
pub use error::{TaskError, TaskResult};
