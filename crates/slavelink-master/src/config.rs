use std::time::Duration;

use serde::{Deserialize, Serialize};
use slavelink_frame::{DEFAULT_MAX_FRAME, MIN_FRAME_SIZE};

use crate::error::{MasterError, Result};

/// Above this rate the inter-frame gap is fixed rather than scaled.
const FIXED_GAP_ABOVE_BAUD: u32 = 19_200;
const FIXED_GAP_MICROS: u64 = 1_750;

/// Timing and sizing of one serial link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Nominal line rate, used only to derive the frame boundary.
    pub baud_rate: u32,
    /// Bits per character on the wire (start + data + parity + stop).
    pub bits_per_char: u32,
    /// How long a unicast request waits for the first reply byte.
    pub respond_timeout_ms: u64,
    /// Quiet period after a broadcast request.
    pub convert_delay_ms: u64,
    /// Largest frame, address and CRC included.
    pub max_frame_size: usize,
    /// Upper bound on how long the link task sleeps without input.
    pub poll_interval_ms: u64,
    /// Capacity of the line/request queue.
    pub queue_depth: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            bits_per_char: 11,
            respond_timeout_ms: 100,
            convert_delay_ms: 200,
            max_frame_size: DEFAULT_MAX_FRAME,
            poll_interval_ms: 50,
            queue_depth: 64,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(MasterError::InvalidConfig("baud_rate must be > 0".into()));
        }
        if self.bits_per_char == 0 {
            return Err(MasterError::InvalidConfig("bits_per_char must be > 0".into()));
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(MasterError::InvalidConfig(format!(
                "max_frame_size must be >= {MIN_FRAME_SIZE}"
            )));
        }
        if self.queue_depth == 0 {
            return Err(MasterError::InvalidConfig("queue_depth must be > 0".into()));
        }
        Ok(())
    }

    /// Line silence that ends a frame: 3.5 character times, or a fixed
    /// 1750 µs at high rates.
    pub fn frame_boundary(&self) -> Duration {
        if self.baud_rate > FIXED_GAP_ABOVE_BAUD {
            return Duration::from_micros(FIXED_GAP_MICROS);
        }
        let micros = 35 * u64::from(self.bits_per_char) * 1_000_000 / (10 * u64::from(self.baud_rate));
        Duration::from_micros(micros)
    }

    pub fn respond_timeout(&self) -> Duration {
        Duration::from_millis(self.respond_timeout_ms)
    }

    pub fn convert_delay(&self) -> Duration {
        Duration::from_millis(self.convert_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
