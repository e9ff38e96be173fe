//! Master side of a half-duplex serial link with in-band telemetry.
//!
//! # Crate Structure
//!
//! - [`transport`]: Serial line pump and channel sockets
//! - [`frame`]: CRC-16 command frames, telemetry layout and the byte demultiplexer
//! - [`telemetry`]: Measurement decoding and power-interruption handling
//! - [`master`]: Master timing engine and link task
//! - [`broadcast`]: Multi-channel broadcast server

/// Re-export transport types.
pub mod transport {
    pub use slavelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use slavelink_frame::*;
}

/// Re-export telemetry types.
pub mod telemetry {
    pub use slavelink_telemetry::*;
}

/// Re-export master engine types.
pub mod master {
    pub use slavelink_master::*;
}

/// Re-export broadcast server types.
pub mod broadcast {
    pub use slavelink_broadcast::*;
}
