//! Byte-level transports for slavelink.
//!
//! Two very different wires meet here:
//! - the serial line to the slave board, drained by a [`LineReader`] into a
//!   bounded queue and written through a [`LineWriter`]
//! - the per-channel Unix domain sockets that external listeners connect to
//!   ([`ChannelSocket`] / [`LinkStream`])
//!
//! Nothing above this layer touches a file descriptor directly.

pub mod error;
pub mod line;
pub mod stream;
pub mod uds;

pub use error::{Result, TransportError};
pub use line::{LineChunk, LineReader, LineStats, LineWriter, SerialLine};
pub use stream::{Liveness, LinkStream};
pub use uds::ChannelSocket;
