use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::measurement::MeasurementSet;

/// Message type tag for measurement reports.
pub const KIND_MEASUREMENT: &str = "measurement";

/// Self-describing telemetry message republished to listeners.
///
/// ```json
/// {"type":"measurement","timestamp_ms":1234,"values":{"top_heater":100.0}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp_ms: u32,
    pub values: BTreeMap<String, f64>,
}

impl TelemetryMessage {
    pub fn measurement(timestamp_ms: u32, set: &MeasurementSet) -> Self {
        Self {
            kind: KIND_MEASUREMENT.to_string(),
            timestamp_ms,
            values: set.named(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Destination for decoded telemetry, normally the broadcast server's
/// telemetry channel.
pub trait Publisher: Send {
    fn publish(&self, message: &TelemetryMessage) -> Result<()>;
}

impl<F> Publisher for F
where
    F: Fn(&TelemetryMessage) -> Result<()> + Send,
{
    fn publish(&self, message: &TelemetryMessage) -> Result<()> {
        self(message)
    }
}
