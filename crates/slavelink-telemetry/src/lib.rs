//! Telemetry decoding for frames captured by the demultiplexer.
//!
//! A frame is either a measurement report (bitmask-selected 16.16 fixed-point
//! values) or a power-interruption notice. Reports become self-describing
//! [`TelemetryMessage`]s handed to a [`Publisher`]; notices trigger the
//! [`RecoveryHook`] once per power cycle.

pub mod decoder;
pub mod error;
pub mod measurement;
pub mod message;
pub mod recovery;

pub use decoder::{
    DecoderStats, TelemetryDecoder, TelemetryEvent, MSG_MEASUREMENT, MSG_POWER_INTERRUPTION,
};
pub use error::{Result, TelemetryError};
pub use measurement::{measurement_name, MeasurementSet, BOTTOM_HEATER, TOP_HEATER};
pub use message::{Publisher, TelemetryMessage};
pub use recovery::{PowerCycleGuard, RecoveryHook};
