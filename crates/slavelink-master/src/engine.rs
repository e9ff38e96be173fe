use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use slavelink_frame::{decode_command, encode_command, CommandFrame, FrameError, BROADCAST_ADDRESS};
use slavelink_transport::LineWriter;
use tracing::{debug, trace, warn};

use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::timer::{OneShot, TimerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    /// Collecting a frame; the boundary timer is running.
    Active,
    /// Overflowed; bytes are discarded until the boundary timer expires.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    /// Frame written; for a broadcast the convert delay is running.
    Active,
    /// Unicast frame written; waiting for the reply.
    WaitResponse,
}

/// A request issued by a higher layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRequest {
    pub address: u8,
    pub payload: Bytes,
}

impl MasterRequest {
    pub fn new(address: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    pub fn broadcast(payload: impl Into<Bytes>) -> Self {
        Self::new(BROADCAST_ADDRESS, payload)
    }

    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST_ADDRESS
    }
}

/// Outcomes reported by [`MasterEngine::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    /// A valid frame arrived. If a unicast request was in flight this is its reply.
    Frame(CommandFrame),
    /// A frame was dropped at the boundary. Ends any in-flight unicast request.
    ReceiveError(FrameError),
    /// The broadcast convert delay elapsed.
    ReadyForNext,
    /// No reply to a unicast request before the respond timeout.
    ResponseTimeout { address: u8 },
    /// The request never made it onto the wire.
    SendFailed { address: u8, reason: String },
}

/// Ownership of the half-duplex line.
///
/// Claimed before the first byte of a request is written and released only
/// once that request reaches a terminal outcome. Clones share the flag so
/// other contexts can observe it.
#[derive(Debug, Clone, Default)]
pub struct LineGate(Arc<AtomicBool>);

impl LineGate {
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub requests_sent: u64,
    pub frames_received: u64,
    pub checksum_errors: u64,
    pub short_frames: u64,
    pub overflows: u64,
    pub timeouts: u64,
    pub io_errors: u64,
}

/// Per-link protocol context: buffers, state pair and the protocol timer.
pub struct MasterEngine<W> {
    config: MasterConfig,
    writer: LineWriter<W>,
    rx: RxState,
    tx: TxState,
    rx_buf: BytesMut,
    tx_buf: BytesMut,
    timer: OneShot,
    in_flight: Option<MasterRequest>,
    gate: LineGate,
    stats: LinkStats,
}

impl<W: Write> MasterEngine<W> {
    pub fn new(config: MasterConfig, writer: W) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rx_buf: BytesMut::with_capacity(config.max_frame_size),
            tx_buf: BytesMut::with_capacity(config.max_frame_size),
            config,
            writer: LineWriter::new(writer),
            rx: RxState::Idle,
            tx: TxState::Idle,
            timer: OneShot::default(),
            in_flight: None,
            gate: LineGate::default(),
            stats: LinkStats::default(),
        })
    }

    /// Frame and transmit a request.
    ///
    /// Fails with [`MasterError::Busy`] unless the receiver is idle and no
    /// request is outstanding. On success the appropriate completion timer is
    /// armed and the outcome arrives later through [`MasterEngine::poll`].
    pub fn send(&mut self, request: MasterRequest, now: Instant) -> Result<()> {
        if self.rx != RxState::Idle || self.tx != TxState::Idle {
            return Err(MasterError::Busy);
        }
        if !self.gate.try_claim() {
            return Err(MasterError::Busy);
        }

        self.tx_buf.clear();
        if let Err(err) = encode_command(
            request.address,
            &request.payload,
            &mut self.tx_buf,
            self.config.max_frame_size,
        ) {
            self.gate.release();
            return Err(err.into());
        }

        self.tx = TxState::Active;
        if let Err(err) = self.writer.write_frame(&self.tx_buf) {
            self.tx = TxState::Idle;
            self.gate.release();
            self.stats.io_errors += 1;
            return Err(err.into());
        }
        self.stats.requests_sent += 1;
        debug!(
            address = request.address,
            len = self.tx_buf.len(),
            "request transmitted"
        );

        if request.is_broadcast() {
            self.timer
                .start(TimerKind::ConvertDelay, now, self.config.convert_delay());
        } else {
            self.tx = TxState::WaitResponse;
            self.timer
                .start(TimerKind::RespondTimeout, now, self.config.respond_timeout());
        }
        self.in_flight = Some(request);
        Ok(())
    }

    /// Account for one command-protocol byte received at `now`.
    pub fn receive_byte(&mut self, byte: u8, now: Instant) {
        match self.rx {
            RxState::Idle => {
                self.rx_buf.clear();
                self.rx_buf.extend_from_slice(&[byte]);
                self.rx = RxState::Active;
            }
            RxState::Active => {
                if self.rx_buf.len() >= self.config.max_frame_size {
                    warn!(max = self.config.max_frame_size, "receive buffer overflow");
                    self.stats.overflows += 1;
                    self.rx = RxState::Error;
                } else {
                    self.rx_buf.extend_from_slice(&[byte]);
                }
            }
            RxState::Error => {}
        }
        self.timer
            .start(TimerKind::FrameBoundary, now, self.config.frame_boundary());
    }

    /// Fire the protocol timer if it is due and report the outcome.
    pub fn poll(&mut self, now: Instant) -> Option<MasterEvent> {
        match self.timer.fire(now)? {
            TimerKind::FrameBoundary => Some(self.on_frame_boundary(now)),
            TimerKind::ConvertDelay => {
                trace!("convert delay elapsed");
                self.finish_request();
                Some(MasterEvent::ReadyForNext)
            }
            TimerKind::RespondTimeout => {
                let address = self
                    .in_flight
                    .as_ref()
                    .map_or(BROADCAST_ADDRESS, |req| req.address);
                self.stats.timeouts += 1;
                debug!(address, "respond timeout");
                self.finish_request();
                Some(MasterEvent::ResponseTimeout { address })
            }
        }
    }

    fn on_frame_boundary(&mut self, now: Instant) -> MasterEvent {
        let outcome = if self.rx == RxState::Error {
            Err(FrameError::TooLarge {
                len: self.rx_buf.len() + 1,
                max: self.config.max_frame_size,
            })
        } else {
            decode_command(&self.rx_buf, self.config.max_frame_size)
        };
        self.rx = RxState::Idle;
        self.rx_buf.clear();

        match &outcome {
            Ok(frame) => {
                self.stats.frames_received += 1;
                trace!(address = frame.address, len = frame.payload.len(), "frame received");
            }
            Err(FrameError::ChecksumMismatch { .. }) => self.stats.checksum_errors += 1,
            Err(FrameError::TooShort { .. }) => self.stats.short_frames += 1,
            Err(_) => {}
        }

        match self.tx {
            TxState::WaitResponse => {
                if let (Ok(frame), Some(req)) = (&outcome, &self.in_flight) {
                    if frame.address != req.address {
                        warn!(
                            expected = req.address,
                            got = frame.address,
                            "reply from unexpected address"
                        );
                    }
                }
                self.finish_request();
            }
            // Stray bytes during a broadcast quiet period restart the delay.
            TxState::Active => {
                self.timer
                    .start(TimerKind::ConvertDelay, now, self.config.convert_delay());
            }
            TxState::Idle => {}
        }

        match outcome {
            Ok(frame) => MasterEvent::Frame(frame),
            Err(err) => {
                debug!(error = %err, "dropping received frame");
                MasterEvent::ReceiveError(err)
            }
        }
    }

    fn finish_request(&mut self) {
        self.in_flight = None;
        self.tx = TxState::Idle;
        self.timer.cancel();
        self.gate.release();
    }

    /// When the next timer fires, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Ready to accept [`MasterEngine::send`].
    pub fn is_idle(&self) -> bool {
        self.rx == RxState::Idle && self.tx == TxState::Idle
    }

    pub fn rx_state(&self) -> RxState {
        self.rx
    }

    pub fn tx_state(&self) -> TxState {
        self.tx
    }

    pub fn in_flight(&self) -> Option<&MasterRequest> {
        self.in_flight.as_ref()
    }

    pub fn gate(&self) -> LineGate {
        self.gate.clone()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        self.writer.get_ref()
    }
}
