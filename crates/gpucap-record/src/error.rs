use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The consumer thread has shut down; nothing more can be recorded.
    #[error("recording worker is no longer running")]
    Disconnected,

    #[error("recording worker panicked")]
    WorkerPanicked,

    #[error("failed to spawn recording worker: {0}")]
    Spawn(#[from] std::io::Error),
}
