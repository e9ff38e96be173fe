//! CRC-16 used by the command protocol (reflected polynomial 0xA001, init 0xFFFF).
//!
//! The CRC is transmitted low byte first, which makes the residual over
//! `payload ‖ crc` exactly zero for an intact frame.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC-16 of `bytes`.
///
/// An empty buffer yields 0, not the register seed.
pub fn checksum16(bytes: &[u8]) -> u16 {
    if bytes.is_empty() {
        return 0;
    }
    bytes.iter().fold(INIT, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u16::from(byte)) & 0xFF) as usize]
    })
}

/// True if `bytes` (payload followed by its little-endian CRC) is intact.
pub fn verify16(bytes: &[u8]) -> bool {
    checksum16(bytes) == 0
}
