//! Message dispatch
//!
//! Complete messages read by the I/O managers go through one bounded
//! [`Queue`] to a single processor thread, which routes them by kind.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::client::ClientHandle;
use crate::context::ServerContext;
use crate::types::{Message, MessageKind, Meta, Reason, Value};
use crate::Result;

pub const PROP_ERROR: &str = "ERROR";
const EXTRA_TOPIC_PREFIX: &str = "TOPIC-";
const LOGGED_TOPICS: usize = 32;

/// A message together with the client it came from.
pub struct Incoming {
    pub client: Arc<ClientHandle>,
    pub msg: Message,
}

pub struct Queue {
    tx: Sender<Incoming>,
    rx: Receiver<Incoming>,
    capacity: usize,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Blocks for at most `timeout` while the queue is full. The message is
    /// handed back inside the error.
    #[inline]
    pub fn push(&self, item: Incoming, timeout: Duration) -> Result<(), SendTimeoutError<Incoming>> {
        self.tx.send_timeout(item, timeout)
    }

    #[inline]
    pub fn pop(&self, timeout: Duration) -> Option<Incoming> {
        self.rx.recv_timeout(timeout).ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct Processor {
    scx: ServerContext,
}

impl Processor {
    pub fn new(scx: ServerContext) -> Self {
        Self { scx }
    }

    pub fn spawn(scx: ServerContext) -> Result<JoinHandle<()>> {
        let processor = Processor::new(scx);
        Ok(thread::Builder::new().name("bolt-processor".into()).spawn(move || processor.run())?)
    }

    fn run(&self) {
        log::info!("processor started");
        let timeout = self.scx.cfg.selection_timeout;
        while self.scx.is_running() {
            match self.scx.queue.rx.recv_timeout(timeout) {
                Ok(incoming) => self.dispatch(incoming),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("processor stopped");
    }

    pub fn dispatch(&self, incoming: Incoming) {
        let Incoming { client, msg } = incoming;
        if client.is_closed() {
            log::debug!("{} closed, dropping {:?}", client, msg);
            return;
        }
        let kind = match msg.kind() {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("{} sent a message of unknown type, {}", client, e);
                return;
            }
        };
        log::trace!("{} {:?}", client, msg);

        let res = match kind {
            MessageKind::Echo => {
                client.send_message(&msg);
                Ok(())
            }
            MessageKind::Negotiate => self.negotiate(&client, &msg),
            MessageKind::Subscribe => self.subscribe(&client, &msg),
            MessageKind::Unsubscribe => self.unsubscribe(&client, &msg),
            MessageKind::Publish | MessageKind::Request | MessageKind::Reply => self.distribute(&client, &msg),
            MessageKind::Statistics => self.statistics(&client, &msg),
            MessageKind::Goodbye => {
                client.failed(&self.scx, Reason::Goodbye);
                Ok(())
            }
            other => {
                log::warn!("{} sent unexpected {} message, ignored", client, other);
                Ok(())
            }
        };

        if let Err(e) = res {
            client.failed(&self.scx, Reason::Corrupt(e.to_string()));
        }
    }

    fn distribute(&self, client: &ClientHandle, msg: &Message) -> Result<()> {
        let topic = match msg.topic()? {
            Some(topic) => topic,
            None => {
                log::warn!("{} published without a topic", client);
                return Ok(());
            }
        };
        let subscribers = match self.scx.distributor.lock().publish(topic) {
            Ok(subscribers) => subscribers,
            Err(e) => {
                log::warn!("{} publish rejected, {}", client, e);
                return Ok(());
            }
        };
        for id in subscribers {
            if let Some(subscriber) = self.scx.client(id) {
                if subscriber.send_message(msg) {
                    self.scx.stats.messages_sent.inc();
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, client: &ClientHandle, msg: &Message) -> Result<()> {
        let meta = msg.meta()?;
        let error = Self::topics(meta, |topic| client.subscribe(&self.scx, topic).map_err(|e| e.to_string()));
        self.ack(client, msg, error, |_| {})
    }

    fn unsubscribe(&self, client: &ClientHandle, msg: &Message) -> Result<()> {
        let meta = msg.meta()?;
        let error = Self::topics(meta, |topic| {
            client.unsubscribe(&self.scx, topic).map(|_| ()).map_err(|e| e.to_string())
        });
        self.ack(client, msg, error, |_| {})
    }

    /// Applies `f` to TOPIC, then TOPIC-2, TOPIC-3 and so on, stopping at the
    /// first missing name or the first failure.
    fn topics<F>(meta: Option<&Meta>, mut f: F) -> Option<String>
    where
        F: FnMut(&str) -> std::result::Result<(), String>,
    {
        let meta = match meta {
            Some(meta) => meta,
            None => return Some("missing TOPIC".into()),
        };
        let first = match meta.topic() {
            Some(topic) => topic,
            None => return Some("missing TOPIC".into()),
        };
        if let Err(e) = f(&**first) {
            return Some(e);
        }
        for n in 2.. {
            let topic = meta.get_str(&format!("{}{}", EXTRA_TOPIC_PREFIX, n))?;
            if let Err(e) = f(topic) {
                return Some(e);
            }
        }
        None
    }

    fn negotiate(&self, client: &ClientHandle, msg: &Message) -> Result<()> {
        let mut opts = client.options();
        let mut reply = Meta::new();
        if let Some(meta) = msg.meta()? {
            opts.negotiate(meta, &self.scx.cfg, &mut reply);
        }
        client.set_options(opts);
        log::debug!("{} negotiated {:?}", client, opts);
        self.ack(client, msg, None, |meta| {
            for (name, value) in reply.properties() {
                meta.add(name.clone(), value.clone());
            }
        })
    }

    fn statistics(&self, client: &ClientHandle, msg: &Message) -> Result<()> {
        self.scx.stats.refresh(&self.scx);
        if log::log_enabled!(log::Level::Debug) {
            let topics = self.scx.distributor.lock().list_topics(LOGGED_TOPICS);
            log::debug!("{} requested statistics, topics: {:?}", client, topics);
        }
        let mut meta = Meta::new();
        if let Some(id) = msg.id()? {
            meta.set_corr_id(id.clone());
        }
        self.scx.stats.to_meta(&mut meta);
        let uptime = (bolt_utils::timestamp_millis() - self.scx.start_time).max(0) / 1000;
        meta.add("queueCapacity", Value::I32(self.scx.queue.capacity().min(i32::MAX as usize) as i32))
            .add("uptime", Value::I32(uptime.min(i32::MAX as i64) as i32));
        client.send_message(&Message::with_meta(MessageKind::Statistics, meta)?);
        Ok(())
    }

    /// Replies ACK correlated to the request ID, with ERROR set on failure.
    fn ack<F>(&self, client: &ClientHandle, msg: &Message, error: Option<String>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Meta),
    {
        let mut meta = Meta::new();
        if let Some(id) = msg.id()? {
            meta.set_corr_id(id.clone());
        }
        if let Some(error) = error {
            log::info!("{} request failed, {}", client, error);
            meta.add(PROP_ERROR, Value::String(error.into()));
        }
        f(&mut meta);
        client.send_message(&Message::with_meta(MessageKind::Ack, meta)?);
        Ok(())
    }
}
