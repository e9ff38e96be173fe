use std::fmt;
use std::io;

use slavelink_broadcast::BroadcastError;
use slavelink_frame::FrameError;
use slavelink_master::MasterError;
use slavelink_telemetry::TelemetryError;
use slavelink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. }
        | TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn telemetry_error(context: &str, err: TelemetryError) -> CliError {
    match err {
        TelemetryError::Frame(err) => frame_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn master_error(context: &str, err: MasterError) -> CliError {
    match err {
        MasterError::Frame(err) => frame_error(context, err),
        MasterError::Io(err) => io_error(context, err),
        MasterError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn broadcast_error(context: &str, err: BroadcastError) -> CliError {
    match err {
        BroadcastError::Transport(err) => transport_error(context, err),
        BroadcastError::Io(err) => io_error(context, err),
        BroadcastError::InvalidChannel(_) | BroadcastError::UnknownChannel(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        BroadcastError::Json(_) | BroadcastError::InvalidMagic | BroadcastError::UnknownKind(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        BroadcastError::ConnectionClosed | BroadcastError::Rejected(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = io_error("recv", io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("recv: "));
    }

    #[test]
    fn bad_config_is_a_usage_error() {
        let err = master_error("config", MasterError::InvalidConfig("baud_rate must be > 0".into()));
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn rejected_join_is_plain_failure() {
        let err = broadcast_error("join", BroadcastError::Rejected("full".into()));
        assert_eq!(err.code, FAILURE);
    }
}
