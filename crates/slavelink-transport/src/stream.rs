use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Result of probing a connection without consuming data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The peer is still connected (data may or may not be pending).
    Alive,
    /// The peer closed its end or the socket is in an error state.
    Gone,
}

/// A connected channel client stream.
///
/// Every stream carries a process-unique token so that inbound data can be
/// matched back to its client slot even after the slot index is reused.
pub struct LinkStream {
    inner: std::os::unix::net::UnixStream,
    token: u64,
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl LinkStream {
    pub(crate) fn from_unix(inner: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner,
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// A connected pair, mostly useful for tests.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Token identifying this connection. Clones share it.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Clone the handle (new descriptor, same token).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            inner: self.inner.try_clone()?,
            token: self.token,
        })
    }

    /// Close both directions. Blocked readers on clones wake up with EOF.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown(std::net::Shutdown::Both);
    }

    /// Check whether the peer is still there without consuming pending data.
    pub fn probe(&self) -> Liveness {
        use std::os::fd::AsRawFd;

        let fd = self.inner.as_raw_fd();
        let mut byte = 0u8;
        // SAFETY: `byte` is a valid writable buffer of length 1 and `fd` is an
        // open socket owned by `self.inner` for the duration of the call.
        let rc = unsafe {
            libc::recv(
                fd,
                (&mut byte as *mut u8).cast::<libc::c_void>(),
                1,
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };

        if rc > 0 {
            return Liveness::Alive;
        }
        if rc == 0 {
            return Liveness::Gone;
        }
        match std::io::Error::last_os_error().kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Liveness::Alive,
            _ => Liveness::Gone,
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("token", &self.token)
            .finish()
    }
}
