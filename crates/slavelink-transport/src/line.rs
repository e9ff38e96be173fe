use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

const READ_CHUNK_SIZE: usize = 256;

/// One unit of work produced by the receive context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChunk {
    /// Raw bytes in arrival order, stamped when the read returned.
    Data { bytes: Bytes, at: Instant },
    /// The line reported end-of-file; no more bytes will follow.
    Eof,
}

/// Snapshot of line counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub bytes_read: u64,
    pub chunks_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_read: AtomicU64,
    chunks_dropped: AtomicU64,
}

/// An opened serial device.
///
/// Line discipline (baud rate, parity) belongs to the UART driver and is
/// expected to be configured before the device is handed to slavelink.
#[derive(Debug)]
pub struct SerialLine {
    path: PathBuf,
    reader: File,
    writer: File,
}

impl SerialLine {
    /// Open a device node (or any file-like endpoint) for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        let reader = writer.try_clone()?;
        info!(?path, "serial line opened");
        Ok(Self {
            path,
            reader,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split into the receive half and the transmit half.
    pub fn split(self) -> (File, File) {
        (self.reader, self.writer)
    }
}

/// Drains a serial `Read` into a bounded queue.
///
/// This is the interrupt-equivalent producer: it never blocks on a full
/// queue. A chunk that does not fit is dropped and counted.
pub struct LineReader<R> {
    inner: R,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Flag that makes [`LineReader::run`] return after its current read.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> LineStats {
        snapshot(&self.counters)
    }

    /// Pump bytes until EOF, a hard I/O error, the stop flag, or the
    /// consumer hanging up.
    pub fn run<T: From<LineChunk>>(&mut self, tx: &SyncSender<T>) -> Result<LineStats> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while !self.stop.load(Ordering::Acquire) {
            let (read, at) = match self.inner.read(&mut chunk) {
                Ok(n) => (n, Instant::now()),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                debug!("serial line reached eof");
                tx.send(T::from(LineChunk::Eof))
                    .map_err(|_| TransportError::QueueClosed)?;
                return Ok(self.stats());
            }

            self.counters
                .bytes_read
                .fetch_add(read as u64, Ordering::Relaxed);
            let bytes = Bytes::copy_from_slice(&chunk[..read]);
            match tx.try_send(T::from(LineChunk::Data { bytes, at })) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(bytes = read, dropped, "line queue full, dropping chunk");
                }
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::QueueClosed),
            }
        }
        Ok(self.stats())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole command frames to the serial `Write`.
pub struct LineWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Write every byte of `frame` and flush.
    pub fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err),
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err),
            }
        }
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn snapshot(counters: &Counters) -> LineStats {
    LineStats {
        bytes_read: counters.bytes_read.load(Ordering::Relaxed),
        chunks_dropped: counters.chunks_dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;

    use super::*;

    fn data(chunk: LineChunk) -> Bytes {
        match chunk {
            LineChunk::Data { bytes, .. } => bytes,
            LineChunk::Eof => panic!("expected data, got eof"),
        }
    }

    #[test]
    fn pumps_bytes_then_eof() {
        let (tx, rx) = sync_channel::<LineChunk>(8);
        let mut reader = LineReader::new(Cursor::new(vec![1u8, 2, 3]));

        let stats = reader.run(&tx).unwrap();

        assert_eq!(data(rx.recv().unwrap()), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(rx.recv().unwrap(), LineChunk::Eof);
        assert_eq!(stats.bytes_read, 3);
        assert_eq!(stats.chunks_dropped, 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (tx, rx) = sync_channel::<LineChunk>(1);
        let reader = ByteByByteReader {
            bytes: vec![9, 8, 7],
            pos: 0,
        };
        let mut reader = LineReader::new(reader);

        // Eof uses a blocking send, so drain from another thread.
        let consumer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            rx.iter().collect::<Vec<_>>()
        });
        let stats = reader.run(&tx).unwrap();
        drop(tx);
        let received = consumer.join().unwrap();

        assert_eq!(stats.bytes_read, 3);
        assert_eq!(stats.chunks_dropped, 2);
        assert_eq!(data(received[0].clone()), Bytes::from_static(&[9]));
        assert_eq!(received.last(), Some(&LineChunk::Eof));
    }

    #[test]
    fn interrupted_read_retries() {
        let (tx, rx) = sync_channel::<LineChunk>(4);
        let mut reader = LineReader::new(InterruptedThenData {
            interrupted: false,
            data: Cursor::new(vec![0x42]),
        });

        reader.run(&tx).unwrap();
        assert_eq!(data(rx.recv().unwrap()), Bytes::from_static(&[0x42]));
    }

    #[test]
    fn chunks_carry_read_time_not_dequeue_time() {
        let (tx, rx) = sync_channel::<LineChunk>(4);
        let mut reader = LineReader::new(SlowReader {
            bytes: vec![0x11, 0x22],
            pos: 0,
            gap: Duration::from_millis(30),
        });

        reader.run(&tx).unwrap();
        // Dequeued back to back, long after both reads.
        std::thread::sleep(Duration::from_millis(20));
        let stamps: Vec<Instant> = rx
            .try_iter()
            .filter_map(|chunk| match chunk {
                LineChunk::Data { at, .. } => Some(at),
                LineChunk::Eof => None,
            })
            .collect();

        assert_eq!(stamps.len(), 2);
        assert!(stamps[1].duration_since(stamps[0]) >= Duration::from_millis(25));
    }

    #[test]
    fn hung_up_consumer_is_reported() {
        let (tx, rx) = sync_channel::<LineChunk>(4);
        drop(rx);
        let mut reader = LineReader::new(Cursor::new(vec![1u8]));
        assert!(matches!(reader.run(&tx), Err(TransportError::QueueClosed)));
    }

    #[test]
    fn writer_writes_whole_frame() {
        let mut writer = LineWriter::new(Cursor::new(Vec::new()));
        writer.write_frame(&[0x01, 0x03, 0x00, 0x00]).unwrap();
        assert_eq!(writer.bytes_written(), 4);
        assert_eq!(writer.into_inner().into_inner(), vec![0x01, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn writer_reports_write_zero() {
        let mut writer = LineWriter::new(ZeroWriter);
        let err = writer.write_frame(&[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }

    #[test]
    fn open_missing_device_fails() {
        let err = SerialLine::open("/definitely/not/a/tty").unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct SlowReader {
        bytes: Vec<u8>,
        pos: usize,
        gap: Duration,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            if self.pos > 0 {
                std::thread::sleep(self.gap);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        data: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.read(buf)
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
