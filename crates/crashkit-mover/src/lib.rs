//! Moves new crashes from one store to another.
//!
//! [`CrashMover`] wires a source [`CrashStore`](crashkit_store::CrashStore),
//! a [`Transform`] and a destination store through a
//! [`TaskEngine`](crashkit_tasks::TaskEngine). Run it once to drain a
//! backlog (`number_of_submissions = "all"`) or leave it polling.

pub mod config;
pub mod driver;
pub mod error;
pub mod transform;

pub use config::{MoverConfig, Submissions};
pub use driver::{CrashMover, NewCrashSource, Pipeline};
pub use error::{MoverError, MoverResult};
pub use transform::{IdentityTransform, Transform};
