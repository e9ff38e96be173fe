use std::collections::VecDeque;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use slavelink_frame::{DemuxSink, Demultiplexer};
use slavelink_telemetry::TelemetryDecoder;
use slavelink_transport::LineChunk;
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::engine::{LineGate, LinkStats, MasterEngine, MasterEvent, MasterRequest};
use crate::error::{MasterError, Result};

/// Work items consumed by the link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    Line(LineChunk),
    Request(MasterRequest),
    /// The board reported power restored; re-arm the recovery guard.
    PowerOn,
    Shutdown,
}

impl From<LineChunk> for LinkInput {
    fn from(chunk: LineChunk) -> Self {
        Self::Line(chunk)
    }
}

/// Receives request outcomes and unsolicited frames.
pub trait MasterHandler: Send {
    fn on_event(&mut self, event: &MasterEvent);
}

impl<F> MasterHandler for F
where
    F: FnMut(&MasterEvent) + Send,
{
    fn on_event(&mut self, event: &MasterEvent) {
        self(event)
    }
}

/// Producer side of a [`LinkTask`]'s queue.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: SyncSender<LinkInput>,
    gate: LineGate,
}

impl LinkHandle {
    /// Queue a request. Requests go out one at a time, in order.
    pub fn request(&self, address: u8, payload: impl Into<Bytes>) -> Result<()> {
        self.send(LinkInput::Request(MasterRequest::new(address, payload)))
    }

    pub fn power_on(&self) -> Result<()> {
        self.send(LinkInput::PowerOn)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(LinkInput::Shutdown)
    }

    /// Sender for a [`slavelink_transport::LineReader`] feeding this link.
    pub fn line_sender(&self) -> SyncSender<LinkInput> {
        self.tx.clone()
    }

    /// True while a request owns the line.
    pub fn is_line_busy(&self) -> bool {
        self.gate.is_claimed()
    }

    fn send(&self, input: LinkInput) -> Result<()> {
        self.tx.send(input).map_err(|_| MasterError::Closed)
    }
}

/// Processing context for one link.
///
/// Owns the engine, the demultiplexer and the telemetry decoder. Everything
/// that touches protocol state happens on the thread running [`LinkTask::run`].
pub struct LinkTask<W> {
    engine: MasterEngine<W>,
    demux: Demultiplexer,
    decoder: TelemetryDecoder,
    handler: Box<dyn MasterHandler>,
    inbox: Receiver<LinkInput>,
    pending: VecDeque<MasterRequest>,
}

impl<W: Write + Send + 'static> LinkTask<W> {
    pub fn new(
        config: MasterConfig,
        writer: W,
        decoder: TelemetryDecoder,
        handler: impl MasterHandler + 'static,
    ) -> Result<(Self, LinkHandle)> {
        let (tx, inbox) = mpsc::sync_channel(config.queue_depth);
        let engine = MasterEngine::new(config, writer)?;
        let handle = LinkHandle {
            tx,
            gate: engine.gate(),
        };
        let task = Self {
            engine,
            demux: Demultiplexer::new(),
            decoder,
            handler: Box::new(handler),
            inbox,
            pending: VecDeque::new(),
        };
        Ok((task, handle))
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<LinkStats>> {
        thread::Builder::new()
            .name("slavelink-link".into())
            .spawn(move || self.run())
    }

    /// Process input until shutdown or until every handle is dropped.
    pub fn run(mut self) -> LinkStats {
        info!(
            baud = self.engine.config().baud_rate,
            boundary_us = self.engine.config().frame_boundary().as_micros() as u64,
            "link task started"
        );
        let poll = self.engine.config().poll_interval();

        loop {
            // Queued input is handled before any timer is checked against the clock.
            let input = match self.inbox.try_recv() {
                Ok(input) => input,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    let now = Instant::now();
                    self.drive(now);
                    let wait = self
                        .engine
                        .next_deadline()
                        .map_or(poll, |at| at.saturating_duration_since(now).min(poll));
                    match self.inbox.recv_timeout(wait) {
                        Ok(input) => input,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            };
            if self.on_input(input).is_break() {
                break;
            }
        }

        let stats = self.engine.stats();
        info!(
            requests = stats.requests_sent,
            frames = stats.frames_received,
            timeouts = stats.timeouts,
            telemetry = self.demux.stats().telemetry_frames,
            dropped_requests = self.pending.len(),
            "link task stopped"
        );
        stats
    }

    fn on_input(&mut self, input: LinkInput) -> ControlFlow<()> {
        match input {
            LinkInput::Line(LineChunk::Data { bytes, at }) => {
                self.expire(at);
                let mut sink = Route {
                    engine: &mut self.engine,
                    decoder: &mut self.decoder,
                    now: at,
                };
                self.demux.feed(&bytes, &mut sink);
            }
            LinkInput::Line(LineChunk::Eof) => {
                warn!("serial line closed");
                let mut sink = Route {
                    engine: &mut self.engine,
                    decoder: &mut self.decoder,
                    now: Instant::now(),
                };
                self.demux.reset(&mut sink);
            }
            LinkInput::Request(request) => self.pending.push_back(request),
            LinkInput::PowerOn => self.decoder.power_guard().power_on(),
            LinkInput::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Report every timer due at `now`.
    fn expire(&mut self, now: Instant) {
        while let Some(event) = self.engine.poll(now) {
            self.handler.on_event(&event);
        }
    }

    /// Fire due timers, then start the next queued request if the line is free.
    fn drive(&mut self, now: Instant) {
        loop {
            self.expire(now);
            if !self.engine.is_idle() {
                return;
            }
            let Some(request) = self.pending.pop_front() else {
                return;
            };
            let address = request.address;
            match self.engine.send(request.clone(), now) {
                Ok(()) => return,
                Err(MasterError::Busy) => {
                    self.pending.push_front(request);
                    return;
                }
                Err(err) => {
                    debug!(address, error = %err, "request not sent");
                    self.handler.on_event(&MasterEvent::SendFailed {
                        address,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Splits demultiplexer output between the command engine and the decoder.
struct Route<'a, W> {
    engine: &'a mut MasterEngine<W>,
    decoder: &'a mut TelemetryDecoder,
    now: Instant,
}

impl<W: Write> DemuxSink for Route<'_, W> {
    fn command_byte(&mut self, byte: u8) {
        self.engine.receive_byte(byte, self.now);
    }

    fn telemetry_frame(&mut self, frame: Bytes) {
        self.decoder.handle(frame);
    }
}
