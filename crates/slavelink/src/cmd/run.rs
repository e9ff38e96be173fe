use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use slavelink_broadcast::{
    BroadcastServer, ChannelEvent, ChannelHandle, ChannelReplies, ServerConfig, TELEMETRY_CHANNEL,
};
use slavelink_master::{LinkHandle, LinkInput, LinkTask, MasterConfig, MasterEvent};
use slavelink_telemetry::{PowerCycleGuard, TelemetryDecoder};
use slavelink_transport::{LineReader, SerialLine};
use tracing::{debug, info, warn};

use crate::cmd::listen::install_ctrlc_handler;
use crate::cmd::{parse_duration, parse_hex, RunArgs};
use crate::exit::{
    broadcast_error, io_error, master_error, transport_error, CliError, CliResult, DATA_INVALID,
    INTERNAL, SUCCESS,
};
use crate::output::{print_command, print_stats, OutputFormat};

/// Channel carrying master events as JSON.
pub const STATUS_CHANNEL: &str = "status";
/// Channel accepting JSON requests when `--accept-commands` is set.
pub const COMMAND_CHANNEL: &str = "command";

const TICK: Duration = Duration::from_millis(100);

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub master: MasterConfig,
    pub server: ServerConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("reading {}", path.display()), err))?;
        serde_json::from_str(&text).map_err(|err| {
            CliError::new(DATA_INVALID, format!("invalid config {}: {err}", path.display()))
        })
    }

    fn apply(&mut self, args: &RunArgs) {
        if let Some(baud) = args.baud {
            self.master.baud_rate = baud;
        }
        if let Some(root) = &args.root {
            self.server.root = root.clone();
        }
        if let Some(max_clients) = args.max_clients {
            self.server.max_clients = max_clients;
        }
    }
}

/// Requests accepted on the command channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum CommandRequest {
    Send { address: u8, payload: String },
    PowerOn,
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    config.apply(&args);
    config
        .master
        .validate()
        .map_err(|err| master_error("invalid master config", err))?;

    let server = BroadcastServer::init_global(config.server.clone());
    let telemetry = server
        .get_channel(TELEMETRY_CHANNEL)
        .map_err(|err| broadcast_error("telemetry channel", err))?;
    let status = server
        .get_channel(STATUS_CHANNEL)
        .map_err(|err| broadcast_error("status channel", err))?;

    let guard = PowerCycleGuard::new(|| warn!("power interruption, recovery backup requested"));
    let decoder = TelemetryDecoder::new(telemetry, guard);

    let line = SerialLine::open(&args.device).map_err(|err| transport_error("open failed", err))?;
    let (rx_half, tx_half) = line.split();

    let (task, link) = LinkTask::new(
        config.master.clone(),
        tx_half,
        decoder,
        move |event: &MasterEvent| {
            if let MasterEvent::Frame(frame) = event {
                print_command(frame, None, format);
            }
            publish_event(&status, event);
        },
    )
    .map_err(|err| master_error("link setup failed", err))?;

    let link_thread = task
        .spawn()
        .map_err(|err| io_error("spawning link task", err))?;

    let mut reader = LineReader::new(rx_half);
    let reader_stop = reader.stop_handle();
    let line_tx = link.line_sender();
    thread::Builder::new()
        .name("slavelink-line".into())
        .spawn(move || match reader.run::<LinkInput>(&line_tx) {
            Ok(stats) => debug!(?stats, "line reader finished"),
            Err(err) => warn!(error = %err, "line reader stopped"),
        })
        .map_err(|err| io_error("spawning line reader", err))?;

    if args.accept_commands {
        let commands = server
            .get_channel(COMMAND_CHANNEL)
            .map_err(|err| broadcast_error("command channel", err))?;
        let requests = link.clone();
        commands
            .register_handler(move |event: ChannelEvent, replies: &mut ChannelReplies<'_>| {
                if let ChannelEvent::Message { client, data } = event {
                    let reply = handle_command(&requests, &data);
                    if let Err(err) = replies.send(client, reply.to_string().as_bytes()) {
                        debug!(client, error = %err, "command reply not delivered");
                    }
                }
            })
            .map_err(|err| broadcast_error("command handler", err))?;
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(
        device = %args.device.display(),
        root = %server.config().root.display(),
        "link running"
    );

    let started = Instant::now();
    while running.load(Ordering::SeqCst) && !link_thread.is_finished() {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(TICK);
    }

    reader_stop.store(true, Ordering::Release);
    if let Err(err) = link.shutdown() {
        debug!(error = %err, "link task already gone");
    }
    let stats = link_thread
        .join()
        .map_err(|_| CliError::new(INTERNAL, "link task panicked"))?;
    server.shutdown();

    print_stats(&stats, format);
    Ok(SUCCESS)
}

fn handle_command(link: &LinkHandle, data: &[u8]) -> serde_json::Value {
    let request: CommandRequest = match serde_json::from_slice(data) {
        Ok(request) => request,
        Err(err) => return json!({ "ok": false, "error": format!("invalid request: {err}") }),
    };

    let queued = match request {
        CommandRequest::Send { address, payload } => match parse_hex(&payload) {
            Ok(payload) => link.request(address, payload),
            Err(err) => return json!({ "ok": false, "error": err.message }),
        },
        CommandRequest::PowerOn => link.power_on(),
    };

    match queued {
        Ok(()) => json!({ "ok": true }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    }
}

fn event_json(event: &MasterEvent) -> serde_json::Value {
    match event {
        MasterEvent::Frame(frame) => json!({
            "event": "frame",
            "address": frame.address,
            "payload": hex::encode(&frame.payload),
        }),
        MasterEvent::ReceiveError(err) => json!({
            "event": "receive_error",
            "error": err.to_string(),
        }),
        MasterEvent::ReadyForNext => json!({ "event": "ready_for_next" }),
        MasterEvent::ResponseTimeout { address } => json!({
            "event": "response_timeout",
            "address": address,
        }),
        MasterEvent::SendFailed { address, reason } => json!({
            "event": "send_failed",
            "address": address,
            "reason": reason,
        }),
    }
}

fn publish_event(status: &ChannelHandle, event: &MasterEvent) {
    if status.client_count() == 0 {
        return;
    }
    let body = event_json(event).to_string();
    if let Err(err) = status.post_all(body.into_bytes()) {
        debug!(error = %err, dropped = status.dropped_posts(), "status event not posted");
    }
}
