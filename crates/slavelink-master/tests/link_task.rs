use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use slavelink_frame::{encode_command, CommandFrame, TelemetryFrame, DEFAULT_MAX_FRAME};
use slavelink_master::{LinkHandle, LinkStats, LinkTask, MasterConfig, MasterEvent};
use slavelink_telemetry::{PowerCycleGuard, TelemetryDecoder, TelemetryMessage, MSG_MEASUREMENT};
use slavelink_transport::{LineReader, LinkStream};

const WAIT: Duration = Duration::from_secs(3);

struct Rig {
    handle: LinkHandle,
    events: mpsc::Receiver<MasterEvent>,
    published: mpsc::Receiver<TelemetryMessage>,
    slave: LinkStream,
    master: LinkStream,
    worker: thread::JoinHandle<LinkStats>,
}

impl Rig {
    fn start(config: MasterConfig) -> Self {
        let (master, slave) = LinkStream::pair().expect("socket pair should open");
        let (event_tx, events) = mpsc::channel();
        let (pub_tx, published) = mpsc::channel();

        let decoder = TelemetryDecoder::new(
            move |msg: &TelemetryMessage| -> slavelink_telemetry::Result<()> {
                let _ = pub_tx.send(msg.clone());
                Ok(())
            },
            PowerCycleGuard::disabled(),
        );
        let writer = master.try_clone().expect("clone should succeed");
        let (task, handle) = LinkTask::new(config, writer, decoder, move |e: &MasterEvent| {
            let _ = event_tx.send(e.clone());
        })
        .expect("link task should build");

        let line_tx = handle.line_sender();
        let mut reader = LineReader::new(master.try_clone().expect("clone should succeed"));
        thread::spawn(move || {
            let _ = reader.run(&line_tx);
        });
        let worker = task.spawn().expect("link thread should start");

        Self {
            handle,
            events,
            published,
            slave,
            master,
            worker,
        }
    }

    fn read_request(&mut self, len: usize) -> Vec<u8> {
        self.slave
            .set_read_timeout(Some(WAIT))
            .expect("timeout should apply");
        let mut buf = vec![0u8; len];
        self.slave.read_exact(&mut buf).expect("request should arrive");
        buf
    }

    fn stop(self) -> LinkStats {
        self.handle.shutdown().expect("task should accept shutdown");
        let stats = self.worker.join().expect("link thread should not panic");
        self.master.shutdown();
        stats
    }
}

fn command(address: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_command(address, payload, &mut buf, DEFAULT_MAX_FRAME).expect("frame should encode");
    buf.to_vec()
}

fn heater_report(timestamp_ms: u32) -> Vec<u8> {
    let payload = [
        0x03, 0x00, 0x00, 0x00, // mask: top + bottom
        0x00, 0x00, 0x64, 0x00, // 100.0
        0x00, 0x00, 0x32, 0x00, // 50.0
    ];
    let mut buf = BytesMut::new();
    TelemetryFrame::new(MSG_MEASUREMENT, timestamp_ms, Bytes::copy_from_slice(&payload))
        .encode(&mut buf)
        .expect("telemetry should encode");
    buf.to_vec()
}

#[test]
fn reply_with_interleaved_telemetry_is_separated() {
    let mut rig = Rig::start(MasterConfig::default());

    rig.handle
        .request(0x05, &b"\x03\x00\x10\x00\x02"[..])
        .expect("request should queue");
    let request = rig.read_request(8);
    assert_eq!(request, command(0x05, b"\x03\x00\x10\x00\x02"));

    let reply = command(0x05, b"\x03\x04\x00\x2A\x00\x2B");
    let mut wire = reply[..3].to_vec();
    wire.extend_from_slice(&heater_report(1500));
    wire.extend_from_slice(&reply[3..]);
    rig.slave.write_all(&wire).expect("reply should send");

    let event = rig.events.recv_timeout(WAIT).expect("reply event expected");
    assert_eq!(
        event,
        MasterEvent::Frame(CommandFrame::new(0x05, &b"\x03\x04\x00\x2A\x00\x2B"[..]))
    );

    let msg = rig.published.recv_timeout(WAIT).expect("telemetry expected");
    assert_eq!(msg.timestamp_ms, 1500);
    assert_eq!(msg.values["top_heater"], 100.0);
    assert_eq!(msg.values["bottom_heater"], 50.0);

    let stats = rig.stop();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.frames_received, 1);
}

#[test]
fn silent_slave_times_out_and_next_request_proceeds() {
    let config = MasterConfig {
        respond_timeout_ms: 30,
        ..MasterConfig::default()
    };
    let mut rig = Rig::start(config);

    rig.handle.request(0x11, &b"\x01"[..]).expect("request should queue");
    rig.handle.request(0x12, &b"\x01"[..]).expect("request should queue");

    assert_eq!(rig.read_request(4), command(0x11, b"\x01"));
    assert_eq!(
        rig.events.recv_timeout(WAIT).expect("timeout event expected"),
        MasterEvent::ResponseTimeout { address: 0x11 }
    );

    assert_eq!(rig.read_request(4), command(0x12, b"\x01"));
    rig.slave
        .write_all(&command(0x12, b"\x01\x00"))
        .expect("reply should send");
    assert!(matches!(
        rig.events.recv_timeout(WAIT).expect("reply event expected"),
        MasterEvent::Frame(frame) if frame.address == 0x12
    ));

    let stats = rig.stop();
    assert_eq!(stats.timeouts, 1);
}

#[test]
fn broadcast_is_followed_by_convert_delay() {
    let config = MasterConfig {
        convert_delay_ms: 20,
        ..MasterConfig::default()
    };
    let mut rig = Rig::start(config);

    rig.handle.request(0x00, &b"\x06\x01"[..]).expect("request should queue");
    assert_eq!(rig.read_request(5), command(0x00, b"\x06\x01"));
    assert_eq!(
        rig.events.recv_timeout(WAIT).expect("ready event expected"),
        MasterEvent::ReadyForNext
    );

    rig.stop();
}

#[test]
fn telemetry_alone_produces_no_command_events() {
    let mut rig = Rig::start(MasterConfig::default());

    rig.slave
        .write_all(&heater_report(7))
        .expect("telemetry should send");
    let msg = rig.published.recv_timeout(WAIT).expect("telemetry expected");
    assert_eq!(msg.timestamp_ms, 7);
    assert!(rig.events.recv_timeout(Duration::from_millis(50)).is_err());

    rig.stop();
}
