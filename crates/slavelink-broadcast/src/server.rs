use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::{ChannelHandle, ChannelOptions, ClientSelector};
use crate::envelope::DEFAULT_MAX_PAYLOAD;
use crate::error::{BroadcastError, Result};
use crate::handler::ChannelHandler;
use crate::handshake::validate_channel;

/// Channel that decoded telemetry is published on.
pub const TELEMETRY_CHANNEL: &str = "telemetry";

/// Per-channel overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub max_clients: usize,
}

/// Broadcast server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding one `<uri>.sock` per channel.
    pub root: PathBuf,
    /// Client slots for channels without an override.
    pub max_clients: usize,
    /// Named channels and their slot counts.
    pub channels: BTreeMap<String, ChannelSpec>,
    /// Allow channels not listed in `channels`.
    pub open_channels: bool,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_payload: usize,
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("slavelink"),
            max_clients: 4,
            channels: BTreeMap::new(),
            open_channels: true,
            handshake_timeout_ms: 2_000,
            write_timeout_ms: 1_000,
            max_payload: DEFAULT_MAX_PAYLOAD,
            queue_depth: 64,
        }
    }
}

impl ServerConfig {
    /// Socket path for a channel.
    pub fn channel_path(&self, uri: &str) -> PathBuf {
        self.root.join(format!("{uri}.sock"))
    }

    fn options_for(&self, uri: &str) -> Result<ChannelOptions> {
        let capacity = match self.channels.get(uri) {
            Some(spec) => spec.max_clients,
            None if self.open_channels => self.max_clients,
            None => return Err(BroadcastError::UnknownChannel(uri.to_string())),
        };
        Ok(ChannelOptions {
            capacity,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_payload: self.max_payload,
            queue_depth: self.queue_depth,
        })
    }
}

static GLOBAL: OnceLock<BroadcastServer> = OnceLock::new();

/// Hosts named channels, each bound lazily on first use.
#[derive(Debug)]
pub struct BroadcastServer {
    config: ServerConfig,
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

impl BroadcastServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide server, created with default settings unless
    /// [`BroadcastServer::init_global`] ran first.
    pub fn global() -> &'static BroadcastServer {
        GLOBAL.get_or_init(|| BroadcastServer::new(ServerConfig::default()))
    }

    /// Configure the process-wide server. Returns the existing instance
    /// untouched if it was already created.
    pub fn init_global(config: ServerConfig) -> &'static BroadcastServer {
        let mut config = Some(config);
        let server = GLOBAL.get_or_init(|| BroadcastServer::new(config.take().unwrap_or_default()));
        if config.is_some() {
            debug!("global broadcast server already initialised, keeping existing config");
        }
        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for `uri`, binding the channel and starting its threads on
    /// first access. Repeated calls return the same channel.
    pub fn get_channel(&self, uri: &str) -> Result<ChannelHandle> {
        validate_channel(uri)?;
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = channels.get(uri) {
            if !handle.is_stopped() {
                return Ok(handle.clone());
            }
        }

        let options = self.config.options_for(uri)?;
        let handle = ChannelHandle::open(uri, self.config.channel_path(uri), options)?;
        channels.insert(uri.to_string(), handle.clone());
        Ok(handle)
    }

    /// Set the channel's single handler; last registration wins.
    pub fn register_handler(
        &self,
        channel: &ChannelHandle,
        handler: impl ChannelHandler + 'static,
    ) -> Result<()> {
        channel.register_handler(handler)
    }

    pub fn send(
        &self,
        channel: &ChannelHandle,
        selector: impl Into<ClientSelector>,
        data: impl Into<Bytes>,
    ) -> Result<usize> {
        channel.send(selector, data)
    }

    /// URIs of channels started so far.
    pub fn channel_uris(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut uris: Vec<String> = channels.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Stop every channel. Later `get_channel` calls start them afresh.
    pub fn shutdown(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        for (uri, handle) in channels.drain() {
            if let Err(err) = handle.stop() {
                debug!(channel = %uri, error = %err, "channel already stopped");
            }
        }
        info!("broadcast server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_path_uses_uri_as_stem() {
        let cfg = ServerConfig {
            root: PathBuf::from("/run/slavelink"),
            ..ServerConfig::default()
        };
        assert_eq!(
            cfg.channel_path("telemetry"),
            PathBuf::from("/run/slavelink/telemetry.sock")
        );
    }

    #[test]
    fn closed_channel_set_refuses_unknown_uri() {
        let mut channels = BTreeMap::new();
        channels.insert("telemetry".to_string(), ChannelSpec { max_clients: 2 });
        let cfg = ServerConfig {
            channels,
            open_channels: false,
            ..ServerConfig::default()
        };

        assert_eq!(cfg.options_for("telemetry").unwrap().capacity, 2);
        assert!(matches!(
            cfg.options_for("status"),
            Err(BroadcastError::UnknownChannel(_))
        ));
    }

    #[test]
    fn config_loads_from_partial_json() {
        let cfg: ServerConfig = serde_json::from_str(
            r#"{"root":"/tmp/sl","channels":{"telemetry":{"max_clients":8}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.root, PathBuf::from("/tmp/sl"));
        assert_eq!(cfg.max_clients, 4);
        assert_eq!(cfg.options_for("telemetry").unwrap().capacity, 8);
    }

    #[test]
    fn invalid_uri_is_rejected_before_binding() {
        let server = BroadcastServer::new(ServerConfig::default());
        assert!(matches!(
            server.get_channel("../escape"),
            Err(BroadcastError::InvalidChannel(_))
        ));
        assert!(server.channel_uris().is_empty());
    }
}
