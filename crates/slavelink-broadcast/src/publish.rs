use slavelink_telemetry::{Publisher, TelemetryError, TelemetryMessage};
use tracing::trace;

use crate::channel::ChannelHandle;

/// Telemetry goes to every active client as one JSON data envelope.
///
/// Posting never waits on subscribers; a backlogged channel drops the
/// message and counts it.
impl Publisher for ChannelHandle {
    fn publish(&self, message: &TelemetryMessage) -> slavelink_telemetry::Result<()> {
        let payload = message.to_bytes()?;
        self.post_all(payload)
            .map_err(|err| TelemetryError::Publish(err.to_string()))?;
        trace!(channel = self.uri(), "telemetry posted");
        Ok(())
    }
}
