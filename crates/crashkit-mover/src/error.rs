use std::io;
use std::path::PathBuf;

use crashkit_store::StoreError;
use crashkit_tasks::TaskError;
use crashkit_types::CrashId;

/// Errors from moving crashes between stores.
#[derive(Debug, thiserror::Error)]
pub enum MoverError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task engine error: {0}")]
    Task(#[from] TaskError),

    /// The transform rejected a crash. The crash is skipped.
    #[error("transform failed for {id}: {reason}")]
    Transform { id: CrashId, reason: String },

    #[error("cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid mover configuration: {0}")]
    Config(String),
}

/// Result alias for mover operations.
pub type MoverResult<T> = Result<T, MoverError>;
