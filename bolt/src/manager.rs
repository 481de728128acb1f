//! I/O managers
//!
//! Each manager is a thread with its own `mio::Poll` driving a bounded pool
//! of connections. Readiness is edge triggered, so sockets are always read
//! and written until they would block. Other threads talk to a manager
//! through its command channel and its [`Mailbox`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::client::Connection;
use crate::context::ServerContext;
use crate::types::{ClientId, HashMap, Reason};
use crate::Result;

const WAKER: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 256;

pub(crate) enum Command {
    Assign(Connection<TcpStream>),
    Shutdown,
}

/// Wakes a manager out of its readiness wait and collects the clients it
/// has to reap.
pub struct Mailbox {
    waker: Waker,
    tickled: AtomicBool,
    deaders: Mutex<Vec<ClientId>>,
}

impl Mailbox {
    pub(crate) fn new(registry: &Registry) -> io::Result<Self> {
        Ok(Self {
            waker: Waker::new(registry, WAKER)?,
            tickled: AtomicBool::new(false),
            deaders: Mutex::new(Vec::new()),
        })
    }

    /// Wakes the manager unless a wake-up is already pending.
    #[inline]
    pub fn tickle(&self) {
        if !self.tickled.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.waker.wake() {
                log::warn!("failed to wake I/O manager, {}", e);
            }
        }
    }

    #[inline]
    pub(crate) fn bury(&self, id: ClientId) {
        self.deaders.lock().push(id);
        self.tickle();
    }

    #[inline]
    fn reset(&self) {
        self.tickled.store(false, Ordering::SeqCst);
    }

    #[inline]
    fn take_deaders(&self) -> Vec<ClientId> {
        std::mem::take(&mut *self.deaders.lock())
    }
}

/// The accept loop's view of a manager thread.
pub struct ManagerHandle {
    id: usize,
    tx: Sender<Command>,
    mailbox: Arc<Mailbox>,
    assigned: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl ManagerHandle {
    pub fn spawn(id: usize, scx: ServerContext) -> Result<Self> {
        let poll = Poll::new()?;
        let mailbox = Arc::new(Mailbox::new(poll.registry())?);
        let assigned = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = unbounded();

        let mut manager = IoManager {
            id,
            scx: scx.clone(),
            poll,
            rx,
            mailbox: mailbox.clone(),
            assigned: assigned.clone(),
            entries: HashMap::default(),
            last_check: Instant::now(),
        };
        let thread = thread::Builder::new().name(format!("bolt-io-{}", id)).spawn(move || manager.run())?;
        scx.stats.managers.inc();
        log::info!("I/O manager {} started", id);

        Ok(Self { id, tx, mailbox, assigned, thread: Some(thread) })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn mailbox(&self) -> Arc<Mailbox> {
        self.mailbox.clone()
    }

    #[inline]
    pub fn assigned(&self) -> usize {
        self.assigned.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn has_capacity(&self, capacity: usize) -> bool {
        self.assigned() < capacity
    }

    pub(crate) fn assign(&self, conn: Connection<TcpStream>) -> Result<()> {
        self.assigned.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Command::Assign(conn)).is_err() {
            self.assigned.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("I/O manager {} is gone", self.id));
        }
        self.mailbox.tickle();
        Ok(())
    }

    /// Stops the thread, failing every connection it still owns.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        self.mailbox.tickle();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("I/O manager {} panicked", self.id);
            }
        }
    }
}

impl Drop for ManagerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Entry {
    conn: Connection<TcpStream>,
    interest: Option<Interest>,
}

struct IoManager {
    id: usize,
    scx: ServerContext,
    poll: Poll,
    rx: Receiver<Command>,
    mailbox: Arc<Mailbox>,
    assigned: Arc<AtomicUsize>,
    entries: HashMap<Token, Entry>,
    last_check: Instant,
}

impl IoManager {
    fn run(&mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            if self.entries.is_empty() {
                log::debug!("I/O manager {} idle", self.id);
                match self.rx.recv() {
                    Ok(cmd) => {
                        if !self.command(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            match self.run_once(&mut events) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    log::error!("I/O manager {} poll failed, {}", self.id, e);
                    break;
                }
            }
        }

        for entry in self.entries.values() {
            entry.conn.handle().failed(&self.scx, Reason::Shutdown);
        }
        self.reap();
        self.scx.stats.managers.dec();
        log::info!("I/O manager {} stopped", self.id);
    }

    fn run_once(&mut self, events: &mut Events) -> io::Result<bool> {
        self.mailbox.reset();
        while let Ok(cmd) = self.rx.try_recv() {
            if !self.command(cmd) {
                return Ok(false);
            }
        }

        let scx = &self.scx;
        let now = Instant::now();
        if now.saturating_duration_since(self.last_check) >= scx.cfg.inactivity_interval {
            for entry in self.entries.values_mut() {
                if let Err(reason) = entry.conn.check_activity(now) {
                    entry.conn.handle().failed(scx, reason);
                }
            }
            self.last_check = now;
        }

        let registry = self.poll.registry();
        let limit = scx.cfg.input_buffer_limit.as_usize();
        for (token, entry) in self.entries.iter_mut() {
            if entry.conn.is_closed() {
                continue;
            }
            let mut res = Ok(());
            if entry.conn.is_read_stalled() {
                res = entry.conn.read(scx);
            }
            if res.is_ok() && entry.conn.has_output() {
                res = entry.conn.write(scx);
            }
            let res = res.and_then(|()| {
                Self::update_interest(registry, *token, entry, limit).map_err(|e| Reason::Io(e.to_string()))
            });
            if let Err(reason) = res {
                entry.conn.handle().failed(scx, reason);
            }
        }

        if let Err(e) = self.poll.poll(events, Some(scx.cfg.selection_timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e);
            }
        }

        for event in events.iter() {
            let token = event.token();
            if token == WAKER {
                continue;
            }
            let entry = match self.entries.get_mut(&token) {
                Some(entry) if !entry.conn.is_closed() => entry,
                _ => continue,
            };
            let mut res = Ok(());
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                res = entry.conn.read(scx);
            }
            if res.is_ok() && event.is_writable() {
                res = entry.conn.write(scx);
            }
            if let Err(reason) = res {
                entry.conn.handle().failed(scx, reason);
            }
        }

        self.reap();
        Ok(true)
    }

    fn command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Assign(mut conn) => {
                let id = conn.handle().id();
                if conn.is_closed() {
                    self.retire(id);
                    return true;
                }
                let token = Token(id as usize);
                if let Err(e) = self.poll.registry().register(conn.stream_mut(), token, Interest::READABLE) {
                    log::warn!("{} could not be registered, {}", conn.handle(), e);
                    conn.handle().failed(&self.scx, Reason::Io(e.to_string()));
                    self.retire(id);
                    return true;
                }
                log::debug!("{} assigned to I/O manager {}", conn.handle(), self.id);
                self.entries.insert(token, Entry { conn, interest: Some(Interest::READABLE) });
                true
            }
            Command::Shutdown => false,
        }
    }

    /// Registers for reading while undelivered input is under `limit`, and
    /// for writing while a buffer is blocked on the socket.
    fn update_interest(registry: &Registry, token: Token, entry: &mut Entry, limit: usize) -> io::Result<()> {
        let mut wanted = entry.conn.wants_read(limit).then_some(Interest::READABLE);
        if entry.conn.is_write_blocked() {
            wanted = Some(wanted.map_or(Interest::WRITABLE, |i| i | Interest::WRITABLE));
        }
        if wanted == entry.interest {
            return Ok(());
        }
        match (entry.interest, wanted) {
            (None, Some(i)) => registry.register(entry.conn.stream_mut(), token, i)?,
            (Some(_), Some(i)) => registry.reregister(entry.conn.stream_mut(), token, i)?,
            (Some(_), None) => registry.deregister(entry.conn.stream_mut())?,
            (None, None) => {}
        }
        entry.interest = wanted;
        Ok(())
    }

    fn reap(&mut self) {
        for id in self.mailbox.take_deaders() {
            if let Some(mut entry) = self.entries.remove(&Token(id as usize)) {
                if entry.interest.is_some() {
                    if let Err(e) = self.poll.registry().deregister(entry.conn.stream_mut()) {
                        log::debug!("{} deregister failed, {}", entry.conn.handle(), e);
                    }
                }
                if let Err(e) = entry.conn.stream_mut().shutdown(std::net::Shutdown::Both) {
                    log::debug!("{} socket shutdown failed, {}", entry.conn.handle(), e);
                }
                self.retire(id);
            }
        }
    }

    fn retire(&self, id: ClientId) {
        self.assigned.fetch_sub(1, Ordering::SeqCst);
        if let Some((_, handle)) = self.scx.clients.remove(&id) {
            self.scx.stats.connections.dec();
            log::info!("{} removed", handle);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A mailbox whose poll is discarded; wake-ups go nowhere.
    pub(crate) fn mailbox() -> Arc<Mailbox> {
        let poll = Poll::new().unwrap();
        Arc::new(Mailbox::new(poll.registry()).unwrap())
    }

    #[test]
    fn test_mailbox_tickle_once() {
        let mut poll = Poll::new().unwrap();
        let mailbox = Mailbox::new(poll.registry()).unwrap();
        mailbox.tickle();
        mailbox.tickle();
        assert!(mailbox.tickled.load(Ordering::SeqCst));

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(std::time::Duration::from_millis(100))).unwrap();
        assert!(events.iter().any(|e| e.token() == WAKER));

        mailbox.reset();
        mailbox.bury(7);
        mailbox.bury(9);
        assert_eq!(mailbox.take_deaders(), vec![7, 9]);
        assert!(mailbox.take_deaders().is_empty());
    }
}
