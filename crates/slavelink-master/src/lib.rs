//! Master side of the slavelink serial protocol.
//!
//! [`MasterEngine`] is the per-link context: it owns the receive and transmit
//! buffers, the receiver/transmitter state pair and the single-shot protocol
//! timer. [`LinkTask`] is the processing context that feeds it from the line
//! queue, routes telemetry through the demultiplexer and reports outcomes to
//! a [`MasterHandler`].

pub mod config;
pub mod engine;
pub mod error;
pub mod task;
pub mod timer;

pub use config::MasterConfig;
pub use engine::{LineGate, LinkStats, MasterEngine, MasterEvent, MasterRequest, RxState, TxState};
pub use error::{MasterError, Result};
pub use task::{LinkHandle, LinkInput, LinkTask, MasterHandler};
pub use timer::{OneShot, TimerKind};
