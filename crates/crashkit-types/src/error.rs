use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid crash id {id:?}: {reason}")]
    InvalidCrashId { id: String, reason: String },

    #[error("invalid depth {0}: must be a single decimal digit")]
    InvalidDepth(u8),

    #[error("serialization error: {0}")]
    Serialization(String),
}
