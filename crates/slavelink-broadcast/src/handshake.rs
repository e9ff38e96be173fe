use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::envelope::{write_envelope, EnvelopeKind, EnvelopeReader};
use crate::error::{BroadcastError, Result};

/// Protocol name carried in every hello.
pub const PROTOCOL_NAME: &str = "slavelink";

const MAX_CHANNEL_LEN: usize = 64;

/// Control messages exchanged on channel connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Client asks to join a channel.
    Hello { protocol: String, channel: String },
    /// Server assigned a client slot.
    Welcome { client: usize },
    /// Server refused the connection and is about to close it.
    Rejected { reason: String },
}

impl ControlMessage {
    pub fn hello(channel: &str) -> Self {
        Self::Hello {
            protocol: PROTOCOL_NAME.to_string(),
            channel: channel.to_string(),
        }
    }
}

pub fn send_control<W: Write>(writer: &mut W, message: &ControlMessage) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    write_envelope(writer, EnvelopeKind::Control, &payload)?;
    Ok(())
}

/// Wait for the next control envelope, giving up at `timeout`.
///
/// The caller is expected to have set a read timeout on the stream no
/// longer than `timeout`; reads that time out are retried until the deadline.
pub fn recv_control<R: Read>(
    reader: &mut EnvelopeReader<R>,
    timeout: Duration,
) -> Result<ControlMessage> {
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(BroadcastError::HandshakeFailed(format!(
                "no control message within {timeout:?}"
            )));
        }
        match reader.read_envelope() {
            Ok(env) if env.kind == EnvelopeKind::Control => {
                return Ok(serde_json::from_slice(&env.payload)?);
            }
            Ok(_) => {
                return Err(BroadcastError::HandshakeFailed(
                    "data before handshake completed".to_string(),
                ))
            }
            Err(BroadcastError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(BroadcastError::ConnectionClosed) => {
                return Err(BroadcastError::HandshakeFailed(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(err) => return Err(err),
        }
    }
}

/// Server side: read and check the client's hello for `channel`.
pub fn expect_hello<R: Read>(
    reader: &mut EnvelopeReader<R>,
    channel: &str,
    timeout: Duration,
) -> Result<()> {
    match recv_control(reader, timeout)? {
        ControlMessage::Hello {
            protocol,
            channel: requested,
        } => {
            if protocol != PROTOCOL_NAME {
                return Err(BroadcastError::HandshakeFailed(format!(
                    "unknown protocol '{protocol}'"
                )));
            }
            if requested != channel {
                return Err(BroadcastError::HandshakeFailed(format!(
                    "hello for '{requested}' on channel '{channel}'"
                )));
            }
            Ok(())
        }
        other => Err(BroadcastError::HandshakeFailed(format!(
            "expected hello, got {other:?}"
        ))),
    }
}

/// Client side: send hello and wait for the slot assignment.
pub fn join<R: Read, W: Write>(
    reader: &mut EnvelopeReader<R>,
    writer: &mut W,
    channel: &str,
    timeout: Duration,
) -> Result<usize> {
    validate_channel(channel)?;
    send_control(writer, &ControlMessage::hello(channel))?;
    match recv_control(reader, timeout)? {
        ControlMessage::Welcome { client } => Ok(client),
        ControlMessage::Rejected { reason } => Err(BroadcastError::Rejected(reason)),
        other => Err(BroadcastError::HandshakeFailed(format!(
            "unexpected reply {other:?}"
        ))),
    }
}

/// Channel names become socket file stems, so keep them path-safe.
pub fn validate_channel(channel: &str) -> Result<()> {
    let ok = !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_LEN
        && channel
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && !channel.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(BroadcastError::InvalidChannel(channel.to_string()))
    }
}
