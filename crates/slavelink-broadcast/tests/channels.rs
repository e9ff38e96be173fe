use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use slavelink_broadcast::{
    BroadcastError, BroadcastServer, ChannelClient, ChannelEvent, ChannelReplies, ChannelSpec,
    ClientSelector, ServerConfig, ALL_CLIENTS, TELEMETRY_CHANNEL,
};
use slavelink_telemetry::{MeasurementSet, Publisher, TelemetryMessage, TOP_HEATER};

const WAIT: Duration = Duration::from_secs(3);

fn unique_root(tag: &str) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/slb-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

fn server_with(tag: &str, max_clients: usize) -> BroadcastServer {
    BroadcastServer::new(ServerConfig {
        root: unique_root(tag),
        max_clients,
        ..ServerConfig::default()
    })
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() >= WAIT {
            panic!("condition not reached in time");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn event_recorder() -> (
    impl FnMut(ChannelEvent, &mut ChannelReplies<'_>) + Send + 'static,
    mpsc::Receiver<ChannelEvent>,
) {
    let (tx, rx) = mpsc::channel();
    let handler = move |event: ChannelEvent, _replies: &mut ChannelReplies<'_>| {
        let _ = tx.send(event);
    };
    (handler, rx)
}

fn cleanup(server: &BroadcastServer) {
    server.shutdown();
    let _ = std::fs::remove_dir_all(&server.config().root);
}

#[test]
fn get_channel_is_idempotent() {
    let server = server_with("idem", 2);
    let first = server.get_channel("status").expect("channel should start");
    let second = server.get_channel("status").expect("channel should be reused");

    assert_eq!(first.path(), second.path());
    assert!(first.path().ends_with("status.sock"));
    assert!(first.path().exists());
    assert_eq!(server.channel_uris(), vec!["status".to_string()]);

    let _client = ChannelClient::connect(first.path(), "status").expect("client should join");
    assert_eq!(second.client_count(), 1);

    cleanup(&server);
}

#[test]
fn third_client_rejected_on_two_slot_channel() {
    let server = server_with("full", 2);
    let channel = server.get_channel("status").expect("channel should start");

    let mut c0 = ChannelClient::connect(channel.path(), "status").expect("first client should join");
    let mut c1 = ChannelClient::connect(channel.path(), "status").expect("second client should join");
    assert_eq!((c0.client_index(), c1.client_index()), (0, 1));

    let err = ChannelClient::connect(channel.path(), "status").expect_err("third client should be rejected");
    assert!(matches!(err, BroadcastError::Rejected(_)));

    assert_eq!(channel.client_count(), 2);
    assert_eq!(channel.send(ALL_CLIENTS, &b"still here"[..]).expect("broadcast should succeed"), 2);
    assert_eq!(c0.recv_timeout(WAIT).expect("c0 should receive").as_ref(), b"still here");
    assert_eq!(c1.recv_timeout(WAIT).expect("c1 should receive").as_ref(), b"still here");

    cleanup(&server);
}

#[test]
fn all_clients_reaches_only_active_slots() {
    let server = server_with("all", 2);
    let channel = server.get_channel("status").expect("channel should start");
    let mut only = ChannelClient::connect(channel.path(), "status").expect("client should join");

    assert!(channel.is_active(0));
    assert!(!channel.is_active(1));
    assert_eq!(channel.send(ALL_CLIENTS, &b"ping"[..]).expect("broadcast should succeed"), 1);
    assert_eq!(only.recv_timeout(WAIT).expect("client should receive").as_ref(), b"ping");
    assert!(!channel.is_active(1));

    assert!(matches!(
        channel.send(ClientSelector::Index(1), &b"x"[..]),
        Err(BroadcastError::ClientInactive(1))
    ));
    assert!(matches!(
        channel.send(7usize, &b"x"[..]),
        Err(BroadcastError::ClientOutOfRange { index: 7, capacity: 2 })
    ));

    cleanup(&server);
}

#[test]
fn handler_sees_lifecycle_and_replies_in_context() {
    let server = server_with("echo", 2);
    let channel = server.get_channel("control").expect("channel should start");

    let (tx, events) = mpsc::channel();
    server
        .register_handler(
            &channel,
            move |event: ChannelEvent, replies: &mut ChannelReplies<'_>| {
                if let ChannelEvent::Message { client, data } = &event {
                    let mut echo = b"echo:".to_vec();
                    echo.extend_from_slice(data);
                    let _ = replies.send(*client, &echo);
                }
                let _ = tx.send(event);
            },
        )
        .expect("handler should register");

    let mut client = ChannelClient::connect(channel.path(), "control").expect("client should join");
    assert_eq!(
        events.recv_timeout(WAIT).expect("connect event"),
        ChannelEvent::Connected { client: 0 }
    );

    client.send(b"hi").expect("client send should succeed");
    assert_eq!(client.recv_timeout(WAIT).expect("echo should arrive").as_ref(), b"echo:hi");
    assert!(matches!(
        events.recv_timeout(WAIT).expect("message event"),
        ChannelEvent::Message { client: 0, .. }
    ));

    client.close();
    assert_eq!(
        events.recv_timeout(WAIT).expect("disconnect event"),
        ChannelEvent::Disconnected { client: 0 }
    );

    cleanup(&server);
}

#[test]
fn dead_client_slot_is_released_and_reused() {
    let server = server_with("heal", 2);
    let channel = server.get_channel("status").expect("channel should start");
    let (handler, events) = event_recorder();
    channel.register_handler(handler).expect("handler should register");

    let mut keeper = ChannelClient::connect(channel.path(), "status").expect("client should join");
    let leaver = ChannelClient::connect(channel.path(), "status").expect("client should join");
    assert_eq!(leaver.client_index(), 1);
    drop(leaver);

    let deadline = Instant::now() + WAIT;
    loop {
        let event = events
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("disconnect event expected");
        if event == (ChannelEvent::Disconnected { client: 1 }) {
            break;
        }
    }
    wait_until(|| !channel.is_active(1));

    assert_eq!(channel.send(ALL_CLIENTS, &b"after"[..]).expect("broadcast should succeed"), 1);
    assert_eq!(keeper.recv_timeout(WAIT).expect("keeper should receive").as_ref(), b"after");

    let replacement = ChannelClient::connect(channel.path(), "status").expect("slot should be reusable");
    assert_eq!(replacement.client_index(), 1);

    cleanup(&server);
}

#[test]
fn wrong_channel_name_is_refused() {
    let server = server_with("name", 2);
    let channel = server.get_channel("status").expect("channel should start");

    let err = ChannelClient::connect(channel.path(), "other").expect_err("hello should be refused");
    assert!(matches!(
        err,
        BroadcastError::Rejected(_) | BroadcastError::HandshakeFailed(_)
    ));
    assert_eq!(channel.client_count(), 0);

    cleanup(&server);
}

#[test]
fn telemetry_is_published_as_json_to_subscribers() {
    let mut channels = BTreeMap::new();
    channels.insert(TELEMETRY_CHANNEL.to_string(), ChannelSpec { max_clients: 1 });
    let server = BroadcastServer::new(ServerConfig {
        root: unique_root("pub"),
        channels,
        open_channels: false,
        ..ServerConfig::default()
    });
    let channel = server.get_channel(TELEMETRY_CHANNEL).expect("channel should start");
    assert!(matches!(
        server.get_channel("status"),
        Err(BroadcastError::UnknownChannel(_))
    ));

    let mut listener = ChannelClient::connect(channel.path(), TELEMETRY_CHANNEL).expect("listener should join");

    let mut set = MeasurementSet::default();
    set.insert(TOP_HEATER, 100.0);
    channel
        .publish(&TelemetryMessage::measurement(1500, &set))
        .expect("publish should succeed");

    let payload = listener.recv_timeout(WAIT).expect("telemetry should arrive");
    let msg: TelemetryMessage = serde_json::from_slice(&payload).expect("payload should be json");
    assert_eq!(msg.timestamp_ms, 1500);
    assert_eq!(msg.values["top_heater"], 100.0);

    cleanup(&server);
}

#[test]
fn stop_disconnects_clients_and_removes_socket() {
    let server = server_with("stop", 2);
    let channel = server.get_channel("status").expect("channel should start");
    let mut client = ChannelClient::connect(channel.path(), "status").expect("client should join");
    let path = channel.path().to_path_buf();

    channel.stop().expect("stop should be accepted");
    assert!(matches!(
        client.recv_timeout(WAIT),
        Err(BroadcastError::ConnectionClosed)
    ));
    wait_until(|| !path.exists());
    assert!(channel.is_stopped());

    let restarted = server.get_channel("status").expect("stopped channel should restart");
    assert!(!restarted.is_stopped());

    cleanup(&server);
}

#[test]
fn post_all_never_waits_on_a_stalled_subscriber() {
    let server = BroadcastServer::new(ServerConfig {
        root: unique_root("stall"),
        max_clients: 2,
        write_timeout_ms: 1_000,
        max_payload: 8 * 1024 * 1024,
        queue_depth: 2,
        ..ServerConfig::default()
    });
    let channel = server.get_channel("status").expect("channel should start");
    let _stalled = ChannelClient::connect(channel.path(), "status").expect("client should join");
    wait_until(|| channel.client_count() == 1);

    // Occupies the channel thread until the write timeout; nobody reads.
    let start = Instant::now();
    channel
        .post_all(vec![0x5Au8; 4 * 1024 * 1024])
        .expect("first post should queue");
    let mut backlogged = 0u64;
    for _ in 0..16 {
        match channel.post_all(&b"tick"[..]) {
            Ok(()) => {}
            Err(BroadcastError::Backlogged(uri)) => {
                assert_eq!(uri, "status");
                backlogged += 1;
            }
            Err(err) => panic!("unexpected post error: {err}"),
        }
    }

    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(backlogged > 0);
    assert_eq!(channel.dropped_posts(), backlogged);

    cleanup(&server);
}

#[test]
fn silent_connection_does_not_hold_up_other_joins() {
    let server = BroadcastServer::new(ServerConfig {
        root: unique_root("silent"),
        max_clients: 2,
        handshake_timeout_ms: 2_000,
        ..ServerConfig::default()
    });
    let channel = server.get_channel("status").expect("channel should start");

    let _silent = std::os::unix::net::UnixStream::connect(channel.path())
        .expect("raw connect should succeed");
    let start = Instant::now();
    let _client = ChannelClient::connect(channel.path(), "status").expect("client should join");

    assert!(start.elapsed() < Duration::from_millis(1_000));
    wait_until(|| channel.client_count() == 1);

    cleanup(&server);
}
