use bytes::Bytes;
use slavelink_frame::TelemetryFrame;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::measurement::MeasurementSet;
use crate::message::{Publisher, TelemetryMessage};
use crate::recovery::PowerCycleGuard;

/// Message id of a measurement report.
pub const MSG_MEASUREMENT: u8 = 0x01;
/// Message id of a power-interruption notice.
pub const MSG_POWER_INTERRUPTION: u8 = 0x02;

/// What a valid telemetry frame meant.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Measurement {
        timestamp_ms: u32,
        set: MeasurementSet,
    },
    PowerInterruption {
        timestamp_ms: u32,
    },
    /// Valid frame with a message id we do not interpret.
    Unrecognized { message_id: u8 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    pub measurements: u64,
    pub power_notices: u64,
    pub rejected: u64,
    pub publish_failures: u64,
}

/// Validates telemetry frames, publishes measurements and routes power
/// notices to the recovery guard.
pub struct TelemetryDecoder {
    publisher: Box<dyn Publisher>,
    power: PowerCycleGuard,
    stats: DecoderStats,
}

impl TelemetryDecoder {
    pub fn new(publisher: impl Publisher + 'static, power: PowerCycleGuard) -> Self {
        Self {
            publisher: Box::new(publisher),
            power,
            stats: DecoderStats::default(),
        }
    }

    /// Validate and interpret one frame without side effects.
    pub fn decode(raw: &Bytes) -> Result<TelemetryEvent> {
        let frame = TelemetryFrame::parse(raw)?;
        match frame.message_id {
            MSG_MEASUREMENT => Ok(TelemetryEvent::Measurement {
                timestamp_ms: frame.timestamp_ms,
                set: MeasurementSet::parse(&frame.payload)?,
            }),
            MSG_POWER_INTERRUPTION => Ok(TelemetryEvent::PowerInterruption {
                timestamp_ms: frame.timestamp_ms,
            }),
            other => Ok(TelemetryEvent::Unrecognized { message_id: other }),
        }
    }

    /// Decode and dispatch. Corrupt frames are logged and dropped.
    pub fn handle(&mut self, raw: Bytes) -> Option<TelemetryEvent> {
        let event = match Self::decode(&raw) {
            Ok(event) => event,
            Err(err) => {
                self.stats.rejected += 1;
                warn!(error = %err, len = raw.len(), "dropping telemetry frame");
                return None;
            }
        };

        match &event {
            TelemetryEvent::Measurement { timestamp_ms, set } => {
                self.stats.measurements += 1;
                trace!(timestamp_ms, count = set.len(), "measurement report");
                let message = TelemetryMessage::measurement(*timestamp_ms, set);
                if let Err(err) = self.publisher.publish(&message) {
                    self.stats.publish_failures += 1;
                    warn!(error = %err, "failed to publish telemetry");
                }
            }
            TelemetryEvent::PowerInterruption { timestamp_ms } => {
                self.stats.power_notices += 1;
                debug!(timestamp_ms, "power interruption notice");
                self.power.notify();
            }
            TelemetryEvent::Unrecognized { message_id } => {
                debug!(message_id, "ignoring telemetry message");
            }
        }
        Some(event)
    }

    pub fn power_guard(&self) -> &PowerCycleGuard {
        &self.power
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

impl std::fmt::Debug for TelemetryDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryDecoder")
            .field("power", &self.power)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::BytesMut;
    use slavelink_frame::SOF_MARKER;

    use super::*;
    use crate::error::TelemetryError;

    fn raw_frame(id: u8, ts: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        TelemetryFrame::new(id, ts, Bytes::copy_from_slice(payload))
            .encode(&mut buf)
            .unwrap();
        buf.split_off(SOF_MARKER.len()).freeze()
    }

    fn heater_payload() -> Vec<u8> {
        vec![
            0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x32, 0x00,
        ]
    }

    fn recording_decoder() -> (
        TelemetryDecoder,
        Arc<Mutex<Vec<TelemetryMessage>>>,
        Arc<AtomicUsize>,
    ) {
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        let backups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&backups);
        let decoder = TelemetryDecoder::new(
            move |msg: &TelemetryMessage| -> Result<()> {
                sink.lock().unwrap().push(msg.clone());
                Ok(())
            },
            PowerCycleGuard::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (decoder, published, backups)
    }

    #[test]
    fn measurement_is_published_with_timestamp() {
        let (mut decoder, published, _) = recording_decoder();
        let event = decoder.handle(raw_frame(MSG_MEASUREMENT, 1500, &heater_payload()));

        assert!(matches!(event, Some(TelemetryEvent::Measurement { timestamp_ms: 1500, .. })));
        let published = published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].timestamp_ms, 1500);
        assert_eq!(published[0].values["top_heater"], 100.0);
        assert_eq!(published[0].values["bottom_heater"], 50.0);
    }

    #[test]
    fn corrupted_frame_publishes_nothing() {
        let (mut decoder, published, _) = recording_decoder();
        let mut raw = BytesMut::from(&raw_frame(MSG_MEASUREMENT, 1, &heater_payload())[..]);
        raw[8] ^= 0x01;

        assert!(decoder.handle(raw.freeze()).is_none());
        assert!(published.lock().unwrap().is_empty());
        assert_eq!(decoder.stats().rejected, 1);
    }

    #[test]
    fn truncated_measurements_are_rejected_whole() {
        // Mask claims two values, payload carries one.
        let payload = [0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00];
        let err = TelemetryDecoder::decode(&raw_frame(MSG_MEASUREMENT, 1, &payload)).unwrap_err();
        assert!(matches!(err, TelemetryError::Truncated { .. }));
    }

    #[test]
    fn power_notice_runs_backup_once_per_cycle() {
        let (mut decoder, published, backups) = recording_decoder();
        let notice = raw_frame(MSG_POWER_INTERRUPTION, 10, &[0, 0, 0, 0]);

        decoder.handle(notice.clone());
        decoder.handle(notice.clone());
        assert_eq!(backups.load(Ordering::SeqCst), 1);

        decoder.power_guard().power_on();
        decoder.handle(notice);
        assert_eq!(backups.load(Ordering::SeqCst), 2);
        assert!(published.lock().unwrap().is_empty());
        assert_eq!(decoder.stats().power_notices, 3);
    }

    #[test]
    fn unknown_message_id_is_ignored() {
        let (mut decoder, published, backups) = recording_decoder();
        let event = decoder.handle(raw_frame(0x7F, 0, &[1, 2, 3, 4]));
        assert_eq!(event, Some(TelemetryEvent::Unrecognized { message_id: 0x7F }));
        assert!(published.lock().unwrap().is_empty());
        assert_eq!(backups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publish_failure_is_counted_not_fatal() {
        let mut decoder = TelemetryDecoder::new(
            |_: &TelemetryMessage| -> Result<()> { Err(TelemetryError::Publish("offline".into())) },
            PowerCycleGuard::disabled(),
        );
        let event = decoder.handle(raw_frame(MSG_MEASUREMENT, 1, &heater_payload()));
        assert!(event.is_some());
        assert_eq!(decoder.stats().publish_failures, 1);
    }
}
