use slavelink_frame::FrameError;

/// Errors raised while decoding or publishing telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The frame failed length or XOR validation.
    #[error("invalid telemetry frame: {0}")]
    Frame(#[from] FrameError),

    /// The payload ended before every selected measurement was read.
    #[error("measurement payload truncated (needed {needed} bytes, had {available})")]
    Truncated { needed: usize, available: usize },

    /// Serialization of the outbound message failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The publisher could not deliver the message.
    #[error("publish failed: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
