use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use slavelink_transport::{ChannelSocket, LinkStream};
use tracing::debug;

use crate::envelope::{write_envelope, EnvelopeKind, EnvelopeReader, DEFAULT_MAX_PAYLOAD};
use crate::error::{BroadcastError, Result};
use crate::handshake::join;

/// Default time allowed for the join handshake.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A subscriber connected to one channel.
pub struct ChannelClient {
    channel: String,
    client: usize,
    reader: EnvelopeReader<LinkStream>,
    writer: LinkStream,
}

impl ChannelClient {
    /// Connect to the channel socket at `path` and join `channel`.
    pub fn connect(path: impl AsRef<Path>, channel: &str) -> Result<Self> {
        Self::connect_with_timeout(path, channel, DEFAULT_JOIN_TIMEOUT)
    }

    pub fn connect_with_timeout(
        path: impl AsRef<Path>,
        channel: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut writer = ChannelSocket::connect(path)?;
        writer.set_read_timeout(Some(timeout))?;
        let mut reader = EnvelopeReader::with_max_payload(writer.try_clone()?, DEFAULT_MAX_PAYLOAD);

        let client = join(&mut reader, &mut writer, channel, timeout)?;
        writer.set_read_timeout(None)?;
        debug!(channel, client, "joined channel");

        Ok(Self {
            channel: channel.to_string(),
            client,
            reader,
            writer,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Slot index the server assigned.
    pub fn client_index(&self) -> usize {
        self.client
    }

    /// Block for the next data payload. Control envelopes are skipped.
    pub fn recv(&mut self) -> Result<Bytes> {
        loop {
            let env = self.reader.read_envelope()?;
            match env.kind {
                EnvelopeKind::Data => return Ok(env.payload),
                EnvelopeKind::Control => debug!(channel = %self.channel, "skipping control message"),
            }
        }
    }

    /// Like [`ChannelClient::recv`] but gives up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Bytes> {
        self.writer.set_read_timeout(Some(timeout))?;
        let result = self.recv();
        self.writer.set_read_timeout(None)?;
        result
    }

    /// Send a payload to the channel's handler.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > DEFAULT_MAX_PAYLOAD {
            return Err(BroadcastError::PayloadTooLarge {
                size: data.len(),
                max: DEFAULT_MAX_PAYLOAD,
            });
        }
        write_envelope(&mut self.writer, EnvelopeKind::Data, data)?;
        Ok(())
    }

    pub fn close(self) {
        self.writer.shutdown();
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("channel", &self.channel)
            .field("client", &self.client)
            .field("token", &self.writer.token())
            .finish()
    }
}
