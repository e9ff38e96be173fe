use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slavelink_broadcast::{BroadcastError, ChannelClient, ServerConfig};

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{broadcast_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_payload, OutputFormat};

const POLL: Duration = Duration::from_millis(250);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut config = ServerConfig::default();
    if let Some(root) = args.root {
        config.root = root;
    }
    let path = config.channel_path(&args.channel);

    let mut client = ChannelClient::connect_with_timeout(&path, &args.channel, timeout)
        .map_err(|err| broadcast_error("join failed", err))?;
    tracing::info!(channel = %args.channel, client = client.client_index(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let payload = match client.recv_timeout(POLL) {
            Ok(payload) => payload,
            Err(BroadcastError::Io(err)) if is_timeout(&err) => continue,
            Err(BroadcastError::ConnectionClosed) => break,
            Err(err) => return Err(broadcast_error("receive failed", err)),
        };

        print_payload(&args.channel, &payload, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
