use std::io;
use std::path::{Path, PathBuf};

use crashkit_types::{CrashId, TypeError};

/// Errors from crash store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The identifier is malformed. Raised before any I/O.
    #[error("invalid crash id: {0}")]
    InvalidIdentifier(#[from] TypeError),

    /// No record exists for the crash.
    #[error("crash not found: {0}")]
    NotFound(CrashId),

    /// The crash exists but has no dump by that name.
    #[error("crash {id} has no dump named {name:?}")]
    DumpNotFound { id: CrashId, name: String },

    /// Transient I/O failure. A fallback store may still succeed.
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store holds something it cannot make sense of.
    #[error("storage corrupt at {}: {reason}", path.display())]
    StorageCorrupt { path: PathBuf, reason: String },

    /// One or more members of a fan-out store failed.
    #[error("{} of {total} fan-out stores failed", errors.len())]
    FanOut {
        total: usize,
        errors: Vec<StoreError>,
    },

    /// The backend does not offer this capability.
    #[error("operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Storage configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an I/O error that happened at `path`.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build a corruption error for `path`.
    pub fn corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::StorageCorrupt {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether trying another store (or again later) could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StorageUnavailable { .. } => true,
            Self::FanOut { errors, .. } => errors.iter().any(Self::is_retryable),
            _ => false,
        }
    }

    /// Whether this is one of the "nothing there" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::DumpNotFound { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> CrashId {
        CrashId::parse("abc123").unwrap()
    }

    #[test]
    fn retryable_classification() {
        let unavailable = StoreError::io("/tmp/x", io::Error::other("disk gone"));
        assert!(unavailable.is_retryable());
        assert!(!StoreError::NotFound(id()).is_retryable());
        assert!(!StoreError::corrupt("/tmp/x", "bad json").is_retryable());

        let fan_out = StoreError::FanOut {
            total: 2,
            errors: vec![StoreError::NotFound(id()), unavailable],
        };
        assert!(fan_out.is_retryable());
    }

    #[test]
    fn not_found_covers_dumps() {
        let err = StoreError::DumpNotFound {
            id: id(),
            name: "flash1".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "crash abc123 has no dump named \"flash1\"");
    }

    #[test]
    fn fan_out_display_counts_failures() {
        let err = StoreError::FanOut {
            total: 3,
            errors: vec![StoreError::NotFound(id())],
        };
        assert_eq!(err.to_string(), "1 of 3 fan-out stores failed");
    }
}
