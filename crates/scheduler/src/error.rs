use thiserror::Error;

/// Errors reported by the job system itself, as opposed to errors a job
/// returns as part of its own output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job panicked while running on a worker
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was discarded before it could run
    #[error("job was dropped before completion")]
    Dropped,

    /// The queue no longer accepts jobs
    #[error("job queue is closed")]
    QueueClosed,

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
