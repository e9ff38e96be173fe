use slavelink_frame::FrameError;

/// Errors returned to callers of the master engine.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// The receiver is not idle or a request is still in flight.
    #[error("line busy")]
    Busy,

    /// The request could not be framed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Writing to the serial line failed.
    #[error("line I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration values are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The link task has stopped.
    #[error("link task closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, MasterError>;
