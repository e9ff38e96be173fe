use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BroadcastError, Result};

/// Envelope header: magic (2) + length (4) + kind (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Magic bytes: "SL" (0x53 0x4C).
pub const MAGIC: [u8; 2] = [0x53, 0x4C];

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Opaque application bytes. Text is UTF-8 by convention.
    Data = 0,
    /// JSON control message.
    Control = 1,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = BroadcastError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Control),
            other => Err(BroadcastError::UnknownKind(other)),
        }
    }
}

/// One message on a channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Bytes,
}

impl Envelope {
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Data,
            payload: payload.into(),
        }
    }

    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Control,
            payload: payload.into(),
        }
    }

    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode an envelope into the wire format.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Kind     │ Payload         │
/// │ 0x53 0x4C    │ (4B LE)   │ (1B)     │ (Length bytes)  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_envelope(kind: EnvelopeKind, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(BroadcastError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u8(kind as u8);
    dst.put_slice(payload);
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` until the buffer holds a complete envelope, then
/// consumes it.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(BroadcastError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(BroadcastError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    let kind = EnvelopeKind::try_from(src[6])?;

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }
    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Envelope { kind, payload }))
}

/// Write one envelope, retrying only on `Interrupted`. Write timeouts
/// surface as errors.
pub fn write_envelope<W: Write>(
    writer: &mut W,
    kind: EnvelopeKind,
    payload: &[u8],
) -> std::io::Result<()> {
    write_envelope_tracked(writer, kind, payload).map_err(|err| err.source)
}

/// A failed envelope write, with how far it got.
#[derive(Debug)]
pub struct EnvelopeWriteError {
    pub written: usize,
    pub total: usize,
    pub source: std::io::Error,
}

impl EnvelopeWriteError {
    /// Part of the envelope is on the wire; the peer can no longer find the
    /// next header.
    pub fn is_torn(&self) -> bool {
        self.written > 0 && self.written < self.total
    }
}

impl std::fmt::Display for EnvelopeWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {}/{} bytes", self.source, self.written, self.total)
    }
}

/// [`write_envelope`], reporting how many bytes went out before a failure.
pub fn write_envelope_tracked<W: Write>(
    writer: &mut W,
    kind: EnvelopeKind,
    payload: &[u8],
) -> std::result::Result<(), EnvelopeWriteError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    let total = HEADER_SIZE + payload.len();
    let fail = |written: usize, source: std::io::Error| EnvelopeWriteError {
        written,
        total,
        source,
    };
    encode_envelope(kind, payload, &mut buf)
        .map_err(|err| fail(0, std::io::Error::new(ErrorKind::InvalidInput, err.to_string())))?;

    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => return Err(fail(offset, ErrorKind::WriteZero.into())),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(fail(offset, err)),
        }
    }
    writer.flush().map_err(|err| fail(offset, err))
}

/// Reads complete envelopes from any `Read` stream.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Read> EnvelopeReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_payload,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(BroadcastError::ConnectionClosed)` at EOF.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.max_payload)? {
                return Ok(envelope);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(BroadcastError::Io(err)),
            };
            if read == 0 {
                return Err(BroadcastError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decode_waits_for_complete_envelope() {
        let mut wire = BytesMut::new();
        encode_envelope(EnvelopeKind::Data, b"hello", &mut wire).unwrap();
        let mut partial = BytesMut::from(&wire[..HEADER_SIZE + 2]);

        assert!(decode_envelope(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        let env = decode_envelope(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(env, Envelope::data(&b"hello"[..]));
        assert!(wire.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(BroadcastError::InvalidMagic)
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(0);
        buf.put_u8(9);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(BroadcastError::UnknownKind(9))
        ));
    }

    #[test]
    fn rejects_oversized_declared_length() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024);
        buf.put_u8(0);
        assert!(matches!(
            decode_envelope(&mut buf, 512),
            Err(BroadcastError::PayloadTooLarge { size: 1024, max: 512 })
        ));
    }

    #[test]
    fn reader_yields_envelopes_in_order_then_eof() {
        let mut wire = Vec::new();
        write_envelope(&mut wire, EnvelopeKind::Control, br#"{"type":"hello"}"#).unwrap();
        write_envelope(&mut wire, EnvelopeKind::Data, b"").unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(wire));
        assert_eq!(reader.read_envelope().unwrap().kind, EnvelopeKind::Control);
        let data = reader.read_envelope().unwrap();
        assert_eq!(data.kind, EnvelopeKind::Data);
        assert!(data.payload.is_empty());
        assert!(matches!(reader.read_envelope(), Err(BroadcastError::ConnectionClosed)));
    }

    #[test]
    fn tracked_write_reports_torn_envelope() {
        let mut short = CappedWriter { room: 10, wire: Vec::new() };
        let err = write_envelope_tracked(&mut short, EnvelopeKind::Data, &[0u8; 32]).unwrap_err();
        assert_eq!(err.written, 10);
        assert_eq!(err.total, HEADER_SIZE + 32);
        assert!(err.is_torn());

        let mut full = CappedWriter { room: 0, wire: Vec::new() };
        let err = write_envelope_tracked(&mut full, EnvelopeKind::Data, b"x").unwrap_err();
        assert_eq!(err.written, 0);
        assert!(!err.is_torn());
    }

    /// Accepts `room` bytes, then times out.
    struct CappedWriter {
        room: usize,
        wire: Vec<u8>,
    }

    impl Write for CappedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.room == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.room);
            self.room -= n;
            self.wire.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
