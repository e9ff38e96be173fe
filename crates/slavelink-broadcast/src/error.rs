/// Errors that can occur in broadcast server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] slavelink_transport::TransportError),

    /// I/O error while reading or writing envelopes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream did not start with the envelope magic.
    #[error("invalid envelope magic")]
    InvalidMagic,

    /// Unknown envelope kind byte.
    #[error("unknown envelope kind {0:#04x}")]
    UnknownKind(u8),

    /// Envelope payload exceeds the configured limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server refused the connection.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Channel name is empty or not usable as a socket path component.
    #[error("invalid channel name '{0}'")]
    InvalidChannel(String),

    /// Channel is not in the configured set.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// Every client slot is taken.
    #[error("channel '{uri}' is full ({capacity} clients)")]
    ChannelFull { uri: String, capacity: usize },

    /// Client index beyond the channel's table.
    #[error("client {index} out of range (capacity {capacity})")]
    ClientOutOfRange { index: usize, capacity: usize },

    /// Client slot is not currently connected.
    #[error("client {0} is not active")]
    ClientInactive(usize),

    /// Delivery to a connected client failed.
    #[error("send to client {client} failed: {source}")]
    SendFailed {
        client: usize,
        source: std::io::Error,
    },

    /// The channel context has shut down.
    #[error("channel '{0}' stopped")]
    Stopped(String),

    /// The channel queue is full; the message was dropped.
    #[error("channel '{0}' is backlogged, message dropped")]
    Backlogged(String),
}

pub type Result<T> = std::result::Result<T, BroadcastError>;
