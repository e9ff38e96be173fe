//! Wire formats spoken on the serial line to the slave board.
//!
//! Two producers share one wire without any outer framing:
//! - the command protocol: `[address][payload][crc16 lo][crc16 hi]`, delimited
//!   only by line silence
//! - in-band telemetry: `[A5 5A C3 3C][len][id][timestamp LE][payload][xor]`
//!
//! The [`Demultiplexer`] splits the raw byte stream between the two, the
//! [`command`] and [`telemetry`] modules understand each side.

pub mod checksum;
#[cfg(feature = "async")]
pub mod codec;
pub mod command;
pub mod demux;
pub mod error;
pub mod telemetry;

pub use checksum::{checksum16, verify16};
#[cfg(feature = "async")]
pub use codec::{DemuxCodec, LinkChunk};
pub use command::{
    decode_command, encode_command, CommandFrame, BROADCAST_ADDRESS, CHECKSUM_SIZE,
    DEFAULT_MAX_FRAME, MIN_FRAME_SIZE,
};
pub use demux::{DemuxOutput, DemuxSink, DemuxState, DemuxStats, Demultiplexer};
pub use error::{FrameError, Result};
pub use telemetry::{
    xor_fold, TelemetryFrame, MAX_TELEMETRY_LEN, MIN_TELEMETRY_LEN, SOF_MARKER,
};
