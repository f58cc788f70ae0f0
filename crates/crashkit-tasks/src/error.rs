use std::io;

/// Errors from the task engine itself.
///
/// Failures of individual task functions never show up here; they are
/// logged and counted in [`TaskStats`](crate::TaskStats).
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The configuration cannot run.
    #[error("invalid task configuration: {0}")]
    Config(String),

    /// `start` was called on an engine that is not freshly created.
    #[error("task engine already started (state: {0})")]
    AlreadyStarted(crate::EngineState),

    /// The OS refused to spawn a thread.
    #[error("cannot spawn {thread} thread: {source}")]
    Spawn {
        thread: String,
        #[source]
        source: io::Error,
    },

    /// A thread died outside the per-item panic guard, e.g. in the job
    /// source.
    #[error("{0} thread panicked")]
    ThreadPanicked(String),
}

/// Result alias for task engine operations.
pub type TaskResult<T> = Result<T, TaskError>;
