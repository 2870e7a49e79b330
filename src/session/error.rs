use thiserror::Error;

/// Errors surfaced by the session control surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a detection session is already running")]
    AlreadyRunning,
    #[error("no detection session is running")]
    NotRunning,
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("frame source lost: {0}")]
    SourceLost(String),
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("failed to spawn session worker: {0}")]
    Spawn(String),
    #[error("session worker panicked; its resources were lost")]
    WorkerPanicked,
    #[error("session controller has been shut down")]
    ShutDown,
}
