//! Multi-channel broadcast server for slavelink status and telemetry.
//!
//! Each channel is a Unix domain socket under the server root with a fixed
//! number of client slots. Clients join with a small JSON handshake and then
//! exchange length-prefixed envelopes. A channel runs on its own thread and
//! hands connection events to one registered [`ChannelHandler`].

pub mod channel;
pub mod client;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod handshake;
mod publish;
pub mod server;

pub use channel::{ChannelHandle, ChannelOptions, ChannelReplies, ClientSelector, ALL_CLIENTS};
pub use client::{ChannelClient, DEFAULT_JOIN_TIMEOUT};
pub use envelope::{Envelope, EnvelopeKind, EnvelopeReader};
pub use error::{BroadcastError, Result};
pub use handler::{ChannelEvent, ChannelHandler};
pub use handshake::ControlMessage;
pub use server::{BroadcastServer, ChannelSpec, ServerConfig, TELEMETRY_CHANNEL};
