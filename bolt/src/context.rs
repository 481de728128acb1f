use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::ClientHandle;
use crate::conf::Broker;
use crate::distributor::Distributor;
use crate::processor::Queue;
use crate::stats::Stats;
use crate::types::{ClientId, DashMap, TimestampMillis};

/// State shared by the accept loop, the I/O managers and the processor.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub cfg: Broker,
    pub distributor: Mutex<Distributor>,
    pub clients: DashMap<ClientId, Arc<ClientHandle>>,
    pub stats: Stats,
    pub queue: Queue,
    pub start_time: TimestampMillis,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    pub fn new(cfg: Broker) -> Self {
        let queue = Queue::new(cfg.queue_size);
        Self {
            inner: Arc::new(ServerContextInner {
                cfg,
                distributor: Mutex::new(Distributor::new()),
                clients: DashMap::default(),
                stats: Stats::new(),
                queue,
                start_time: bolt_utils::timestamp_millis(),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(true),
            }),
        }
    }

    #[inline]
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    #[inline]
    pub fn client(&self, id: ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.get(&id).map(|c| c.value().clone())
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServerContext ...")?;
        Ok(())
    }
}
