use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use slavelink_transport::{ChannelSocket, Liveness, LinkStream, TransportError};
use tracing::{debug, info, trace, warn};

use crate::envelope::{write_envelope_tracked, EnvelopeKind, EnvelopeReader};
use crate::error::{BroadcastError, Result};
use crate::handler::{ChannelEvent, ChannelHandler};
use crate::handshake::{expect_hello, send_control, ControlMessage};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Which clients of a channel a send addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSelector {
    Index(usize),
    /// Every active client.
    All,
}

pub const ALL_CLIENTS: ClientSelector = ClientSelector::All;

impl From<usize> for ClientSelector {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Limits applied to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub capacity: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub max_payload: usize,
    pub queue_depth: usize,
}

enum Request {
    Join {
        stream: LinkStream,
        reader: EnvelopeReader<LinkStream>,
    },
    Inbound {
        token: u64,
        data: Bytes,
    },
    Closed {
        token: u64,
    },
    Send {
        selector: ClientSelector,
        data: Bytes,
        reply: SyncSender<Result<usize>>,
    },
    /// Fire-and-forget delivery to every active client.
    Publish {
        data: Bytes,
    },
    SetHandler(Box<dyn ChannelHandler>),
    Stop,
}

/// Fixed-capacity slot arena. Owned by the channel thread; `live` mirrors
/// slot occupancy for best-effort reads from other threads.
struct ClientTable {
    slots: Vec<Option<LinkStream>>,
    live: Arc<[AtomicBool]>,
    max_payload: usize,
}

impl ClientTable {
    fn new(capacity: usize, max_payload: usize) -> Self {
        let live: Vec<AtomicBool> = (0..capacity).map(|_| AtomicBool::new(false)).collect();
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            live: Arc::from(live),
            max_payload,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn occupy(&mut self, client: usize, stream: LinkStream) {
        self.slots[client] = Some(stream);
        self.live[client].store(true, Ordering::Release);
    }

    fn find(&self, token: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.token() == token))
    }

    fn is_active(&self, client: usize) -> bool {
        self.slots.get(client).is_some_and(Option::is_some)
    }

    /// Free a slot. Returns false if it was already free.
    fn release(&mut self, client: usize) -> bool {
        match self.slots.get_mut(client).and_then(Option::take) {
            Some(stream) => {
                stream.shutdown();
                self.live[client].store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Send to the selected clients. Slots found dead are released and
    /// pushed onto `dead`.
    fn deliver(
        &mut self,
        selector: ClientSelector,
        data: &[u8],
        dead: &mut Vec<usize>,
    ) -> Result<usize> {
        if data.len() > self.max_payload {
            return Err(BroadcastError::PayloadTooLarge {
                size: data.len(),
                max: self.max_payload,
            });
        }

        match selector {
            ClientSelector::Index(client) => {
                if client >= self.capacity() {
                    return Err(BroadcastError::ClientOutOfRange {
                        index: client,
                        capacity: self.capacity(),
                    });
                }
                if !self.is_active(client) {
                    return Err(BroadcastError::ClientInactive(client));
                }
                self.send_one(client, data, dead)
                    .map(|()| 1)
                    .map_err(|source| BroadcastError::SendFailed { client, source })
            }
            ClientSelector::All => {
                let mut reached = 0;
                for client in 0..self.capacity() {
                    if !self.is_active(client) {
                        continue;
                    }
                    match self.send_one(client, data, dead) {
                        Ok(()) => reached += 1,
                        Err(err) => debug!(client, error = %err, "broadcast skipped client"),
                    }
                }
                Ok(reached)
            }
        }
    }

    fn send_one(&mut self, client: usize, data: &[u8], dead: &mut Vec<usize>) -> std::io::Result<()> {
        let Some(stream) = self.slots[client].as_mut() else {
            return Err(std::io::ErrorKind::NotConnected.into());
        };
        let Err(err) = write_envelope_tracked(stream, EnvelopeKind::Data, data) else {
            return Ok(());
        };

        if err.is_torn() {
            warn!(client, error = %err, "envelope cut short, releasing slot");
            self.release(client);
            dead.push(client);
            return Err(err.source);
        }
        match stream.probe() {
            Liveness::Gone => {
                warn!(client, error = %err, "client gone, releasing slot");
                self.release(client);
                dead.push(client);
            }
            Liveness::Alive => debug!(client, error = %err, "send failed but client still connected"),
        }
        Err(err.source)
    }
}

/// In-context access to the channel's clients, handed to handlers.
pub struct ChannelReplies<'a> {
    table: &'a mut ClientTable,
    dead: &'a mut Vec<usize>,
}

impl ChannelReplies<'_> {
    /// Same contract as [`ChannelHandle::send`], executed on the channel thread.
    pub fn send(&mut self, selector: impl Into<ClientSelector>, data: &[u8]) -> Result<usize> {
        self.table.deliver(selector.into(), data, self.dead)
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn is_active(&self, client: usize) -> bool {
        self.table.is_active(client)
    }
}

struct Shared {
    uri: String,
    path: PathBuf,
    tx: SyncSender<Request>,
    live: Arc<[AtomicBool]>,
    stopped: Arc<AtomicBool>,
    dropped_posts: AtomicU64,
}

/// Cloneable handle to a running channel.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelHandle {
    /// Bind the channel socket and start its threads.
    pub(crate) fn open(uri: &str, path: PathBuf, options: ChannelOptions) -> Result<Self> {
        let socket = ChannelSocket::bind(&path)?;
        let (tx, rx) = mpsc::sync_channel(options.queue_depth.max(1));
        let table = ClientTable::new(options.capacity, options.max_payload);
        let stopped = Arc::new(AtomicBool::new(false));

        let shared = Arc::new(Shared {
            uri: uri.to_string(),
            path: path.clone(),
            tx: tx.clone(),
            live: Arc::clone(&table.live),
            stopped: Arc::clone(&stopped),
            dropped_posts: AtomicU64::new(0),
        });

        let context = ChannelContext {
            uri: uri.to_string(),
            path,
            options: options.clone(),
            table,
            handler: None,
            tx: tx.clone(),
            rx,
            stopped: Arc::clone(&stopped),
        };
        thread::Builder::new()
            .name(format!("slavelink-ch-{uri}"))
            .spawn(move || context.run())?;

        let acceptor = Acceptor {
            uri: uri.to_string(),
            socket,
            options,
            tx: tx.clone(),
            stopped,
        };
        let spawned = thread::Builder::new()
            .name(format!("slavelink-accept-{uri}"))
            .spawn(move || acceptor.run());
        if let Err(err) = spawned {
            // The context holds its own sender and would otherwise never exit.
            let _ = tx.send(Request::Stop);
            return Err(err.into());
        }

        info!(channel = uri, capacity = shared.live.len(), "channel started");
        Ok(Self { shared })
    }

    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    /// Socket path clients connect to.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn capacity(&self) -> usize {
        self.shared.live.len()
    }

    /// Best-effort view; the channel thread is the authority.
    pub fn is_active(&self, client: usize) -> bool {
        self.shared
            .live
            .get(client)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn client_count(&self) -> usize {
        self.shared
            .live
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    /// Deliver `data` to one client or to all active clients.
    ///
    /// Returns how many clients were reached. A single index that is out of
    /// range or inactive is an error with no side effects. For
    /// [`ClientSelector::All`] a failing client is re-checked and released if
    /// gone, and delivery continues with the rest.
    ///
    /// Blocks until the channel thread has processed the request, so it must
    /// not be called from this channel's own handler.
    pub fn send(&self, selector: impl Into<ClientSelector>, data: impl Into<Bytes>) -> Result<usize> {
        let (reply, result) = mpsc::sync_channel(1);
        self.post(Request::Send {
            selector: selector.into(),
            data: data.into(),
            reply,
        })?;
        result.recv().map_err(|_| self.stopped_error())?
    }

    /// Queue `data` for every active client without waiting for delivery.
    ///
    /// Never blocks. When the channel queue is full the message is dropped,
    /// counted, and [`BroadcastError::Backlogged`] is returned.
    pub fn post_all(&self, data: impl Into<Bytes>) -> Result<()> {
        match self.shared.tx.try_send(Request::Publish { data: data.into() }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.dropped_posts.fetch_add(1, Ordering::Relaxed);
                Err(BroadcastError::Backlogged(self.shared.uri.clone()))
            }
            Err(TrySendError::Disconnected(_)) => Err(self.stopped_error()),
        }
    }

    /// Messages [`ChannelHandle::post_all`] dropped on a full queue.
    pub fn dropped_posts(&self) -> u64 {
        self.shared.dropped_posts.load(Ordering::Relaxed)
    }

    /// Install the channel's handler, replacing any previous one.
    pub fn register_handler(&self, handler: impl ChannelHandler + 'static) -> Result<()> {
        self.post(Request::SetHandler(Box::new(handler)))
    }

    /// Disconnect every client, stop accepting and remove the socket.
    pub fn stop(&self) -> Result<()> {
        self.post(Request::Stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    fn post(&self, request: Request) -> Result<()> {
        self.shared
            .tx
            .send(request)
            .map_err(|_| self.stopped_error())
    }

    fn stopped_error(&self) -> BroadcastError {
        BroadcastError::Stopped(self.shared.uri.clone())
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("uri", &self.shared.uri)
            .field("path", &self.shared.path)
            .field("capacity", &self.capacity())
            .field("clients", &self.client_count())
            .finish()
    }
}

/// The channel's execution context. Sole owner of the client table.
struct ChannelContext {
    uri: String,
    path: PathBuf,
    options: ChannelOptions,
    table: ClientTable,
    handler: Option<Box<dyn ChannelHandler>>,
    tx: SyncSender<Request>,
    rx: Receiver<Request>,
    stopped: Arc<AtomicBool>,
}

impl ChannelContext {
    fn run(mut self) {
        while let Ok(request) = self.rx.recv() {
            match request {
                Request::Join { stream, reader } => self.on_join(stream, reader),
                Request::Inbound { token, data } => match self.table.find(token) {
                    Some(client) => self.dispatch(ChannelEvent::Message { client, data }),
                    None => warn!(
                        channel = %self.uri,
                        token,
                        len = data.len(),
                        "data from unknown connection, dropping"
                    ),
                },
                Request::Closed { token } => {
                    if let Some(client) = self.table.find(token) {
                        debug!(channel = %self.uri, client, "client closed connection");
                        self.table.release(client);
                        self.settle(vec![client]);
                    }
                }
                Request::Send {
                    selector,
                    data,
                    reply,
                } => {
                    let mut dead = Vec::new();
                    let result = self.table.deliver(selector, &data, &mut dead);
                    let _ = reply.send(result);
                    self.settle(dead);
                }
                Request::Publish { data } => {
                    let mut dead = Vec::new();
                    match self.table.deliver(ALL_CLIENTS, &data, &mut dead) {
                        Ok(reached) => trace!(channel = %self.uri, reached, "posted"),
                        Err(err) => debug!(channel = %self.uri, error = %err, "post not delivered"),
                    }
                    self.settle(dead);
                }
                Request::SetHandler(handler) => {
                    debug!(channel = %self.uri, "handler registered");
                    self.handler = Some(handler);
                }
                Request::Stop => break,
            }
        }
        self.shutdown();
    }

    fn on_join(&mut self, mut stream: LinkStream, reader: EnvelopeReader<LinkStream>) {
        let Some(client) = self.table.free_slot() else {
            let reason = BroadcastError::ChannelFull {
                uri: self.uri.clone(),
                capacity: self.table.capacity(),
            }
            .to_string();
            warn!(channel = %self.uri, "rejecting client, no free slot");
            let _ = send_control(&mut stream, &ControlMessage::Rejected { reason });
            stream.shutdown();
            return;
        };

        let token = stream.token();
        let prepared = stream
            .set_read_timeout(None)
            .and_then(|()| stream.set_write_timeout(Some(self.options.write_timeout)));
        if let Err(err) = prepared {
            debug!(channel = %self.uri, error = %err, "client lost before welcome");
            stream.shutdown();
            return;
        }

        // The slot is taken before the welcome goes out, so a client that
        // has been welcomed is always visible as active.
        self.table.occupy(client, stream);
        let welcomed = match self.table.slots[client].as_mut() {
            Some(stream) => send_control(stream, &ControlMessage::Welcome { client }),
            None => Err(BroadcastError::ClientInactive(client)),
        };
        if let Err(err) = welcomed {
            debug!(channel = %self.uri, client, error = %err, "client lost during welcome");
            self.table.release(client);
            return;
        }

        if let Err(err) = spawn_reader(&self.uri, client, token, reader, self.tx.clone()) {
            warn!(channel = %self.uri, client, error = %err, "failed to start client reader");
            self.table.release(client);
            return;
        }

        info!(channel = %self.uri, client, "client connected");
        self.dispatch(ChannelEvent::Connected { client });
    }

    fn dispatch(&mut self, event: ChannelEvent) {
        let mut dead = Vec::new();
        self.emit(event, &mut dead);
        self.settle(dead);
    }

    fn emit(&mut self, event: ChannelEvent, dead: &mut Vec<usize>) {
        match self.handler.as_mut() {
            Some(handler) => {
                let mut replies = ChannelReplies {
                    table: &mut self.table,
                    dead,
                };
                handler.on_event(event, &mut replies);
            }
            None => debug!(channel = %self.uri, ?event, "no handler registered"),
        }
    }

    /// Report released slots to the handler. Replies sent while handling a
    /// disconnect may discover more dead slots.
    fn settle(&mut self, mut dead: Vec<usize>) {
        while let Some(client) = dead.pop() {
            info!(channel = %self.uri, client, "client disconnected");
            self.emit(ChannelEvent::Disconnected { client }, &mut dead);
        }
    }

    fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::Release);
        let released: Vec<usize> = (0..self.table.capacity())
            .filter(|&client| self.table.release(client))
            .collect();
        self.settle(released);
        // Wake the acceptor so it sees the stop flag.
        let _ = ChannelSocket::connect(&self.path);
        info!(channel = %self.uri, "channel stopped");
    }
}

fn spawn_reader(
    uri: &str,
    client: usize,
    token: u64,
    mut reader: EnvelopeReader<LinkStream>,
    tx: SyncSender<Request>,
) -> std::io::Result<()> {
    let channel = uri.to_string();
    thread::Builder::new()
        .name(format!("slavelink-{uri}-{client}"))
        .spawn(move || {
            loop {
                match reader.read_envelope() {
                    Ok(env) if env.kind == EnvelopeKind::Data => {
                        if tx
                            .send(Request::Inbound {
                                token,
                                data: env.payload,
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(_) => debug!(channel = %channel, client, "ignoring control message"),
                    Err(BroadcastError::ConnectionClosed) => break,
                    Err(err) => {
                        debug!(channel = %channel, client, error = %err, "client read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(Request::Closed { token });
        })?;
    Ok(())
}

/// Accepts connections and hands each one to a short-lived handshake
/// thread, which forwards admitted clients to the channel thread.
struct Acceptor {
    uri: String,
    socket: ChannelSocket,
    options: ChannelOptions,
    tx: SyncSender<Request>,
    stopped: Arc<AtomicBool>,
}

impl Acceptor {
    fn run(self) {
        loop {
            let accepted = self.socket.accept();
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            let stream = match accepted {
                Ok(stream) => stream,
                Err(TransportError::Accept(err)) if err.kind() == std::io::ErrorKind::Interrupted => {
                    continue
                }
                Err(err) => {
                    warn!(channel = %self.uri, error = %err, "accept failed");
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            let admission = Admission {
                uri: self.uri.clone(),
                options: self.options.clone(),
                tx: self.tx.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("slavelink-hello-{}", self.uri))
                .spawn(move || admission.run(stream));
            if let Err(err) = spawned {
                warn!(channel = %self.uri, error = %err, "failed to start handshake thread");
            }
        }
        debug!(channel = %self.uri, "acceptor exiting");
    }
}

/// Handshake for one accepted connection.
struct Admission {
    uri: String,
    options: ChannelOptions,
    tx: SyncSender<Request>,
}

impl Admission {
    fn run(self, stream: LinkStream) {
        match self.admit(stream) {
            Ok((stream, reader)) => {
                if self.tx.send(Request::Join { stream, reader }).is_err() {
                    debug!(channel = %self.uri, "channel stopped during handshake");
                }
            }
            Err(err) => debug!(channel = %self.uri, error = %err, "handshake failed"),
        }
    }

    fn admit(&self, mut stream: LinkStream) -> Result<(LinkStream, EnvelopeReader<LinkStream>)> {
        stream.set_read_timeout(Some(self.options.handshake_timeout))?;
        stream.set_write_timeout(Some(self.options.handshake_timeout))?;
        let mut reader =
            EnvelopeReader::with_max_payload(stream.try_clone()?, self.options.max_payload);

        if let Err(err) = expect_hello(&mut reader, &self.uri, self.options.handshake_timeout) {
            let _ = send_control(
                &mut stream,
                &ControlMessage::Rejected {
                    reason: err.to_string(),
                },
            );
            stream.shutdown();
            return Err(err);
        }
        Ok((stream, reader))
    }
}
