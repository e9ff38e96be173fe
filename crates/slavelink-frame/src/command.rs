use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::{checksum16, verify16};
use crate::error::{FrameError, Result};

/// Address 0 is a broadcast: every slave acts on it and none replies.
pub const BROADCAST_ADDRESS: u8 = 0;

/// Trailing CRC bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Address + at least one payload byte + CRC.
pub const MIN_FRAME_SIZE: usize = 4;

/// Default upper bound for a whole frame on the wire.
pub const DEFAULT_MAX_FRAME: usize = 256;

/// A validated command-protocol frame, without its CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Target address on transmit, source address on receive.
    pub address: u8,
    pub payload: Bytes,
}

impl CommandFrame {
    pub fn new(address: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST_ADDRESS
    }

    /// Size on the wire including address and CRC.
    pub fn wire_size(&self) -> usize {
        1 + self.payload.len() + CHECKSUM_SIZE
    }

    pub fn encode(&self, dst: &mut BytesMut, max_frame: usize) -> Result<()> {
        encode_command(self.address, &self.payload, dst, max_frame)
    }
}

/// Append `[address][payload][crc lo][crc hi]` to `dst`.
///
/// ```text
/// ┌─────────┬──────────────────┬──────────┬──────────┐
/// │ Address │ Payload          │ CRC lo   │ CRC hi   │
/// │ (1B)    │ (1..max-3 bytes) │ (1B)     │ (1B)     │
/// └─────────┴──────────────────┴──────────┴──────────┘
/// ```
pub fn encode_command(address: u8, payload: &[u8], dst: &mut BytesMut, max_frame: usize) -> Result<()> {
    let len = 1 + payload.len() + CHECKSUM_SIZE;
    if len < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            len,
            min: MIN_FRAME_SIZE,
        });
    }
    if len > max_frame {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame,
        });
    }

    let start = dst.len();
    dst.reserve(len);
    dst.put_u8(address);
    dst.put_slice(payload);
    let crc = checksum16(&dst[start..]);
    dst.put_u16_le(crc);
    Ok(())
}

/// Validate one complete frame as delimited by the inter-frame silence.
pub fn decode_command(frame: &[u8], max_frame: usize) -> Result<CommandFrame> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            len: frame.len(),
            min: MIN_FRAME_SIZE,
        });
    }
    if frame.len() > max_frame {
        return Err(FrameError::TooLarge {
            len: frame.len(),
            max: max_frame,
        });
    }
    if !verify16(frame) {
        return Err(FrameError::ChecksumMismatch {
            residual: checksum16(frame),
        });
    }

    let body = &frame[1..frame.len() - CHECKSUM_SIZE];
    Ok(CommandFrame {
        address: frame[0],
        payload: Bytes::copy_from_slice(body),
    })
}
