//! Connected clients
//!
//! A client is split in two halves. [`ClientHandle`] is shared through an
//! `Arc` between the processor, the client registry and the owning I/O
//! manager: it holds the outbound queue, the negotiated options and the
//! subscription list. [`Connection`] is owned by exactly one I/O manager and
//! holds the socket, the [`Unpacker`] and the read/write progress.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use bytestring::ByteString;
use parking_lot::{Mutex, RwLock};

use bolt_codec::{DecodeError, Unpacker};

use crate::conf::Broker;
use crate::context::ServerContext;
use crate::distributor::SubscribeError;
use crate::manager::Mailbox;
use crate::processor::Incoming;
use crate::types::{ClientId, Message, Meta, Reason, Value};

const MIN_BUFFER_SIZE: usize = 1024;

pub const OPT_MAX_MESSAGE_SIZE: &str = "maxMessageSize";
pub const OPT_INPUT_BUFFER_SIZE: &str = "inputBufferSize";
pub const OPT_OUTPUT_BUFFER_SIZE: &str = "outputBufferSize";
pub const OPT_INACTIVITY_TIMEOUT: &str = "inactivityTimeout_ms";

/// Per-connection settings a client may change with NEGOTIATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub max_message_size: usize,
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
    pub inactivity_timeout: Duration,
}

impl From<&Broker> for ClientOptions {
    fn from(cfg: &Broker) -> Self {
        Self {
            max_message_size: cfg.max_message_size.as_usize(),
            input_buffer_size: cfg.input_buffer_size.as_usize(),
            output_buffer_size: cfg.output_buffer_size.as_usize(),
            inactivity_timeout: cfg.inactivity_timeout,
        }
    }
}

impl ClientOptions {
    /// Applies the proposals found in `meta`, clamped to what the broker
    /// allows, and writes the values now in force into `reply`.
    pub fn negotiate(&mut self, meta: &Meta, cfg: &Broker, reply: &mut Meta) {
        let clamp = |v: i32, min: usize, max: usize| (v.max(0) as usize).clamp(min, max.max(min));

        if let Some(v) = meta.get_i32(OPT_MAX_MESSAGE_SIZE) {
            self.max_message_size = clamp(v, 1, cfg.max_message_size.as_usize());
        }
        if let Some(v) = meta.get_i32(OPT_INPUT_BUFFER_SIZE) {
            self.input_buffer_size = clamp(v, MIN_BUFFER_SIZE, cfg.input_buffer_limit.as_usize());
        }
        if let Some(v) = meta.get_i32(OPT_OUTPUT_BUFFER_SIZE) {
            self.output_buffer_size = clamp(v, MIN_BUFFER_SIZE, cfg.max_message_size.as_usize());
        }
        if let Some(v) = meta.get_i32(OPT_INACTIVITY_TIMEOUT) {
            let min = cfg.inactivity_interval.as_millis() as usize;
            self.inactivity_timeout = Duration::from_millis(clamp(v, min, i32::MAX as usize) as u64);
        }

        let i32_of = |v: usize| Value::I32(v.min(i32::MAX as usize) as i32);
        reply
            .add(OPT_MAX_MESSAGE_SIZE, i32_of(self.max_message_size))
            .add(OPT_INPUT_BUFFER_SIZE, i32_of(self.input_buffer_size))
            .add(OPT_OUTPUT_BUFFER_SIZE, i32_of(self.output_buffer_size))
            .add(OPT_INACTIVITY_TIMEOUT, i32_of(self.inactivity_timeout.as_millis() as usize));
    }
}

pub struct ClientHandle {
    id: ClientId,
    peer: SocketAddr,
    options: RwLock<ClientOptions>,
    subscriptions: Mutex<Vec<ByteString>>,
    output: Mutex<VecDeque<Bytes>>,
    closed: AtomicBool,
    mailbox: Arc<Mailbox>,
}

impl ClientHandle {
    pub(crate) fn new(id: ClientId, peer: SocketAddr, options: ClientOptions, mailbox: Arc<Mailbox>) -> Self {
        Self {
            id,
            peer,
            options: RwLock::new(options),
            subscriptions: Mutex::new(Vec::new()),
            output: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            mailbox,
        }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn options(&self) -> ClientOptions {
        *self.options.read()
    }

    #[inline]
    pub fn set_options(&self, options: ClientOptions) {
        *self.options.write() = options;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn subscriptions(&self) -> Vec<ByteString> {
        self.subscriptions.lock().clone()
    }

    /// Queues an encoded frame and wakes the owning manager. Returns false
    /// once the client is closed.
    pub fn send(&self, frame: Bytes) -> bool {
        if self.is_closed() {
            return false;
        }
        self.output.lock().push_back(frame);
        self.mailbox.tickle();
        true
    }

    #[inline]
    pub fn send_message(&self, msg: &Message) -> bool {
        self.send(msg.bytes().clone())
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        !self.output.lock().is_empty()
    }

    #[inline]
    pub fn output_len(&self) -> usize {
        self.output.lock().len()
    }

    /// Takes the next buffer to write, coalescing queued frames while they
    /// fit in `limit` bytes. A single frame larger than `limit` is returned
    /// on its own.
    pub fn take_output(&self, limit: usize) -> Option<Bytes> {
        let mut output = self.output.lock();
        let first = output.pop_front()?;
        if output.front().is_none_or(|next| first.len() + next.len() > limit) {
            return Some(first);
        }
        let mut buf = BytesMut::with_capacity(limit);
        buf.extend_from_slice(&first);
        while output.front().is_some_and(|next| buf.len() + next.len() <= limit) {
            if let Some(next) = output.pop_front() {
                buf.extend_from_slice(&next);
            }
        }
        Some(buf.freeze())
    }

    pub fn subscribe(&self, scx: &ServerContext, topic: &str) -> Result<(), SubscribeError> {
        let mut distributor = scx.distributor.lock();
        if self.is_closed() {
            return Err(SubscribeError::Closed);
        }
        distributor.subscribe(self.id, topic)?;
        self.subscriptions.lock().push(ByteString::from(topic));
        log::debug!("{} subscribed to {}", self, topic);
        Ok(())
    }

    /// Returns whether the client was subscribed to `topic`. Only a malformed
    /// topic is an error.
    pub fn unsubscribe(&self, scx: &ServerContext, topic: &str) -> Result<bool, SubscribeError> {
        let mut distributor = scx.distributor.lock();
        let removed = distributor.unsubscribe(self.id, topic)?;
        let mut subscriptions = self.subscriptions.lock();
        if let Some(pos) = subscriptions.iter().position(|t| &**t == topic) {
            subscriptions.swap_remove(pos);
        }
        if removed {
            log::debug!("{} unsubscribed from {}", self, topic);
        }
        Ok(removed)
    }

    /// Tears the client down. Only the first call has any effect.
    pub fn failed(&self, scx: &ServerContext, reason: Reason) {
        if self.is_closed() {
            log::debug!("{} already closed, ignoring {}", self, reason);
            return;
        }
        match reason {
            Reason::Goodbye | Reason::ConnectionClosed | Reason::Shutdown => {
                log::info!("{} closing, {}", self, reason)
            }
            _ => {
                scx.stats.failures.inc();
                log::warn!("{} failed, {}", self, reason)
            }
        }
        self.cleanup(scx);
    }

    /// Removes every subscription, drops pending output and hands the client
    /// to its manager for reaping. Idempotent.
    pub fn cleanup(&self, scx: &ServerContext) {
        {
            let mut distributor = scx.distributor.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            for topic in self.subscriptions.lock().drain(..) {
                if let Err(e) = distributor.unsubscribe(self.id, &topic) {
                    log::warn!("{} cleanup of {} failed, {}", self, topic, e);
                }
            }
        }
        self.output.lock().clear();
        self.mailbox.bury(self.id);
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client {}@{}", self.id, self.peer)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("output", &self.output_len())
            .finish()
    }
}

/// The manager-owned half of a client.
pub struct Connection<S> {
    handle: Arc<ClientHandle>,
    stream: S,
    unpacker: Unpacker,
    read_buf: Vec<u8>,
    inbound: VecDeque<Message>,
    inbound_bytes: usize,
    outbound: Option<Bytes>,
    read_stalled: bool,
    inactive: bool,
    last_activity: Instant,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(handle: Arc<ClientHandle>, stream: S) -> Self {
        let opts = handle.options();
        Self {
            unpacker: Unpacker::new(opts.max_message_size),
            read_buf: vec![0; opts.input_buffer_size],
            handle,
            stream,
            inbound: VecDeque::new(),
            inbound_bytes: 0,
            outbound: None,
            read_stalled: false,
            inactive: false,
            last_activity: Instant::now(),
        }
    }

    #[inline]
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Bytes of complete messages not yet handed to the processor.
    #[inline]
    pub fn inbound_bytes(&self) -> usize {
        self.inbound_bytes
    }

    /// Reading stopped before the socket was drained.
    #[inline]
    pub fn is_read_stalled(&self) -> bool {
        self.read_stalled
    }

    #[inline]
    pub fn wants_read(&self, limit: usize) -> bool {
        self.inbound_bytes < limit
    }

    /// A partially written buffer is waiting for the socket.
    #[inline]
    pub fn is_write_blocked(&self) -> bool {
        self.outbound.is_some()
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        self.outbound.is_some() || self.handle.has_output()
    }

    /// Reads until the socket would block, the input limit is reached or the
    /// processor queue stays full.
    pub fn read(&mut self, scx: &ServerContext) -> Result<(), Reason> {
        let opts = self.handle.options();
        if self.read_buf.len() != opts.input_buffer_size {
            self.read_buf.resize(opts.input_buffer_size, 0);
        }
        self.unpacker.set_max_size(opts.max_message_size);
        let limit = scx.cfg.input_buffer_limit.as_usize();

        loop {
            if !self.forward(scx) || !self.wants_read(limit) {
                self.read_stalled = true;
                return Ok(());
            }
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(Reason::ConnectionClosed),
                Ok(n) => {
                    self.last_activity = Instant::now();
                    self.inactive = false;
                    scx.stats.bytes_read.incs(n as isize);
                    let inbound = &mut self.inbound;
                    let inbound_bytes = &mut self.inbound_bytes;
                    self.unpacker
                        .unpack(&self.read_buf[..n], |msg| {
                            *inbound_bytes += msg.len();
                            inbound.push_back(msg);
                        })
                        .map_err(|e| match e {
                            DecodeError::MaxSizeExceeded { size, .. } => Reason::MaxMessageSize(size),
                            e => Reason::Corrupt(e.to_string()),
                        })?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.read_stalled = false;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Reason::Io(e.to_string())),
            }
        }
    }

    /// Hands buffered messages to the processor queue, waiting at most
    /// `selection_timeout` per message. Returns false if one had to be kept.
    pub fn forward(&mut self, scx: &ServerContext) -> bool {
        while let Some(msg) = self.inbound.pop_front() {
            let len = msg.len();
            let incoming = Incoming { client: self.handle.clone(), msg };
            match scx.queue.push(incoming, scx.cfg.selection_timeout) {
                Ok(()) => {
                    self.inbound_bytes -= len;
                    scx.stats.messages_received.inc();
                }
                Err(e) => {
                    log::debug!("{} processor queue is full, holding {} messages", self.handle, self.inbound.len() + 1);
                    self.inbound.push_front(e.into_inner().msg);
                    return false;
                }
            }
        }
        true
    }

    /// Writes queued output until it is exhausted or the socket would block.
    pub fn write(&mut self, scx: &ServerContext) -> Result<(), Reason> {
        let limit = self.handle.options().output_buffer_size;
        loop {
            let mut buf = match self.outbound.take().or_else(|| self.handle.take_output(limit)) {
                Some(buf) => buf,
                None => return Ok(()),
            };
            match self.stream.write(&buf) {
                Ok(0) => return Err(Reason::Io("write returned zero".into())),
                Ok(n) => {
                    scx.stats.bytes_written.incs(n as isize);
                    if n < buf.len() {
                        buf.advance(n);
                        self.outbound = Some(buf);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.outbound = Some(buf);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.outbound = Some(buf);
                }
                Err(e) => return Err(Reason::Io(e.to_string())),
            }
        }
    }

    /// Flags the connection inactive, failing it if it was already flagged
    /// and nothing has been read for longer than the inactivity timeout.
    pub fn check_activity(&mut self, now: Instant) -> Result<(), Reason> {
        if self.inactive {
            let idle = now.saturating_duration_since(self.last_activity);
            if idle > self.handle.options().inactivity_timeout {
                return Err(Reason::InactivityTimeout);
            }
            log::debug!("{} inactive for {:?}", self.handle, idle);
        }
        self.inactive = true;
        Ok(())
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.handle)
            .field("inbound", &self.inbound.len())
            .field("inbound_bytes", &self.inbound_bytes)
            .field("read_stalled", &self.read_stalled)
            .field("inactive", &self.inactive)
            .finish()
    }
}
