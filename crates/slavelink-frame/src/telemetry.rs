use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Start-of-frame marker announcing an in-band telemetry frame.
pub const SOF_MARKER: [u8; 4] = [0xA5, 0x5A, 0xC3, 0x3C];

/// Length field + message id + timestamp.
const HEADER_LEN: usize = 6;
const TRAILER_LEN: usize = 1;

/// Smallest declared length accepted after a marker match.
pub const MIN_TELEMETRY_LEN: usize = 11;

/// Largest declared length: header, 4-byte mask, all 32 measurements, trailer.
pub const MAX_TELEMETRY_LEN: usize = HEADER_LEN + 4 + 32 * 4 + TRAILER_LEN;

/// XOR of every byte in `bytes`.
pub fn xor_fold(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// A telemetry frame as captured by the demultiplexer, marker stripped.
///
/// `raw` starts at the length field and ends with the XOR trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub message_id: u8,
    pub timestamp_ms: u32,
    pub payload: Bytes,
}

impl TelemetryFrame {
    /// Validate length and XOR fold, then split out the header fields.
    pub fn parse(raw: &Bytes) -> Result<Self> {
        if raw.len() < MIN_TELEMETRY_LEN {
            return Err(FrameError::TooShort {
                len: raw.len(),
                min: MIN_TELEMETRY_LEN,
            });
        }
        let declared = usize::from(raw[0]);
        if declared != raw.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                captured: raw.len(),
            });
        }
        let fold = xor_fold(raw);
        if fold != 0 {
            return Err(FrameError::XorMismatch { fold });
        }

        let timestamp_ms = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
        Ok(Self {
            message_id: raw[1],
            timestamp_ms,
            payload: raw.slice(HEADER_LEN..raw.len() - TRAILER_LEN),
        })
    }

    pub fn new(message_id: u8, timestamp_ms: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            timestamp_ms,
            payload: payload.into(),
        }
    }

    /// Declared length of this frame on the wire (marker excluded).
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + TRAILER_LEN
    }

    /// Append the full wire form, marker included, to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = self.wire_len();
        if len < MIN_TELEMETRY_LEN {
            return Err(FrameError::TooShort {
                len,
                min: MIN_TELEMETRY_LEN,
            });
        }
        if len > MAX_TELEMETRY_LEN {
            return Err(FrameError::TooLarge {
                len,
                max: MAX_TELEMETRY_LEN,
            });
        }

        dst.reserve(SOF_MARKER.len() + len);
        dst.put_slice(&SOF_MARKER);
        let start = dst.len();
        dst.put_u8(len as u8);
        dst.put_u8(self.message_id);
        dst.put_u32_le(self.timestamp_ms);
        dst.put_slice(&self.payload);
        let fold = xor_fold(&dst[start..]);
        dst.put_u8(fold);
        Ok(())
    }
}
