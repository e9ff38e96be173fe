use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::telemetry::{MAX_TELEMETRY_LEN, MIN_TELEMETRY_LEN, SOF_MARKER};

/// Receives the two halves of the demultiplexed stream.
pub trait DemuxSink {
    /// One byte belonging to the command protocol, in arrival order.
    fn command_byte(&mut self, byte: u8);

    /// One complete telemetry frame, from the length field through the XOR trailer.
    fn telemetry_frame(&mut self, frame: Bytes);

    fn command_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.command_byte(byte);
        }
    }
}

/// Collecting sink for callers that want batch results.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxOutput {
    pub command: Vec<u8>,
    pub telemetry: Vec<Bytes>,
}

impl DemuxSink for DemuxOutput {
    fn command_byte(&mut self, byte: u8) {
        self.command.push(byte);
    }

    fn telemetry_frame(&mut self, frame: Bytes) {
        self.telemetry.push(frame);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Bytes pass straight through to the command protocol.
    CommandByte,
    /// First marker byte seen.
    Sof1,
    Sof2,
    Sof3,
    /// Whole marker seen; the next byte is the telemetry length field.
    Sof4,
    /// Capturing a telemetry frame of the declared length.
    TelemetryPayload,
}

/// Counters kept by the demultiplexer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxStats {
    pub telemetry_frames: u64,
    /// Marker prefixes that did not complete.
    pub false_matches: u64,
    /// Complete markers followed by an implausible length.
    pub rejected_lengths: u64,
}

/// Splits the raw serial stream into command bytes and telemetry frames.
///
/// Every byte consumed while speculatively matching the marker is accounted
/// for exactly once: either it ends up in a telemetry frame or it is replayed
/// to the command sink in its original position.
#[derive(Debug)]
pub struct Demultiplexer {
    state: DemuxState,
    pending: BytesMut,
    expected: usize,
    min_len: usize,
    max_len: usize,
    stats: DemuxStats,
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::with_limits(MIN_TELEMETRY_LEN, MAX_TELEMETRY_LEN)
    }

    /// Override the accepted range for the declared telemetry length.
    pub fn with_limits(min_len: usize, max_len: usize) -> Self {
        Self {
            state: DemuxState::CommandByte,
            pending: BytesMut::with_capacity(SOF_MARKER.len() + max_len),
            expected: 0,
            min_len,
            max_len,
            stats: DemuxStats::default(),
        }
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn feed<S: DemuxSink>(&mut self, bytes: &[u8], sink: &mut S) {
        for &byte in bytes {
            self.push(byte, sink);
        }
    }

    pub fn push<S: DemuxSink>(&mut self, byte: u8, sink: &mut S) {
        match self.state {
            DemuxState::CommandByte => {
                if byte == SOF_MARKER[0] {
                    self.pending.extend_from_slice(&[byte]);
                    self.state = DemuxState::Sof1;
                } else {
                    sink.command_byte(byte);
                }
            }
            DemuxState::Sof1 | DemuxState::Sof2 | DemuxState::Sof3 => {
                let matched = self.pending.len();
                if byte == SOF_MARKER[matched] {
                    self.pending.extend_from_slice(&[byte]);
                    self.state = match self.state {
                        DemuxState::Sof1 => DemuxState::Sof2,
                        DemuxState::Sof2 => DemuxState::Sof3,
                        _ => DemuxState::Sof4,
                    };
                    return;
                }

                self.stats.false_matches += 1;
                trace!(matched, byte, "marker prefix broken");
                self.flush(sink);
                if byte == SOF_MARKER[0] {
                    self.pending.extend_from_slice(&[byte]);
                    self.state = DemuxState::Sof1;
                } else {
                    sink.command_byte(byte);
                }
            }
            DemuxState::Sof4 => {
                self.pending.extend_from_slice(&[byte]);
                let declared = usize::from(byte);
                if declared < self.min_len || declared > self.max_len {
                    self.stats.rejected_lengths += 1;
                    debug!(declared, "implausible telemetry length, replaying as command bytes");
                    self.flush(sink);
                    return;
                }
                self.expected = declared;
                self.state = DemuxState::TelemetryPayload;
            }
            DemuxState::TelemetryPayload => {
                self.pending.extend_from_slice(&[byte]);
                if self.pending.len() - SOF_MARKER.len() == self.expected {
                    let frame = self.pending.split_off(SOF_MARKER.len()).freeze();
                    self.pending.clear();
                    self.state = DemuxState::CommandByte;
                    self.stats.telemetry_frames += 1;
                    sink.telemetry_frame(frame);
                }
            }
        }
    }

    /// Abandon any partial match, replaying held bytes to the command sink.
    pub fn reset<S: DemuxSink>(&mut self, sink: &mut S) {
        self.flush(sink);
    }

    fn flush<S: DemuxSink>(&mut self, sink: &mut S) {
        if !self.pending.is_empty() {
            sink.command_bytes(&self.pending);
            self.pending.clear();
        }
        self.expected = 0;
        self.state = DemuxState::CommandByte;
    }
}
