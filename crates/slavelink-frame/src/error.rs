/// Framing errors. All of them are non-fatal: the offending frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes than the smallest valid frame.
    #[error("frame too short ({len} bytes, min {min})")]
    TooShort { len: usize, min: usize },

    /// More bytes than the configured maximum.
    #[error("frame too large ({len} bytes, max {max})")]
    TooLarge { len: usize, max: usize },

    /// CRC-16 residual over the command frame was not zero.
    #[error("checksum mismatch (residual 0x{residual:04x})")]
    ChecksumMismatch { residual: u16 },

    /// XOR fold over the telemetry frame was not zero.
    #[error("telemetry xor mismatch (fold 0x{fold:02x})")]
    XorMismatch { fold: u8 },

    /// Declared telemetry length does not match the captured bytes.
    #[error("telemetry length mismatch (declared {declared}, captured {captured})")]
    LengthMismatch { declared: usize, captured: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
