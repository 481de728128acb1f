//! Broker counters
//!
//! Gauges are [`Counter`]s so each one also remembers its peak. Topic and
//! route figures are copied from the distributor when a snapshot is taken.

use serde_json::json;

use crate::context::ServerContext;
use crate::types::{Counter, Meta, Value};

#[derive(Debug, Default)]
pub struct Stats {
    pub connections: Counter,
    pub managers: Counter,
    pub topics: Counter,
    pub routes: Counter,
    pub messages_received: Counter,
    pub messages_sent: Counter,
    pub bytes_read: Counter,
    pub bytes_written: Counter,
    pub queue: Counter,
    pub failures: Counter,
}

impl Stats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes the values owned by other components.
    pub fn refresh(&self, scx: &ServerContext) {
        {
            let distributor = scx.distributor.lock();
            self.topics.sets(distributor.topics() as isize);
            self.routes.sets(distributor.routes() as isize);
        }
        self.queue.sets(scx.queue.len() as isize);
    }

    /// Counters as I32 properties of a STATISTICS reply. Values saturate.
    pub fn to_meta(&self, meta: &mut Meta) {
        let i32_of = |c: &Counter| Value::I32(c.count().clamp(i32::MIN as isize, i32::MAX as isize) as i32);
        meta.add("connections", i32_of(&self.connections))
            .add("managers", i32_of(&self.managers))
            .add("topics", i32_of(&self.topics))
            .add("routes", i32_of(&self.routes))
            .add("messagesReceived", i32_of(&self.messages_received))
            .add("messagesSent", i32_of(&self.messages_sent))
            .add("bytesRead", i32_of(&self.bytes_read))
            .add("bytesWritten", i32_of(&self.bytes_written))
            .add("queueDepth", i32_of(&self.queue))
            .add("failures", i32_of(&self.failures));
    }

    /// Counters with their peaks, logged when the broker stops.
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "connections": self.connections.to_json(),
            "managers": self.managers.to_json(),
            "topics": self.topics.to_json(),
            "routes": self.routes.to_json(),
            "messages.received": self.messages_received.count(),
            "messages.sent": self.messages_sent.count(),
            "bytes.read": self.bytes_read.count(),
            "bytes.written": self.bytes_written.count(),
            "queue": self.queue.to_json(),
            "failures": self.failures.count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_to_meta() {
        let stats = Stats::new();
        stats.connections.incs(3);
        stats.connections.dec();
        stats.bytes_read.incs(isize::MAX);
        let mut meta = Meta::new();
        stats.to_meta(&mut meta);
        assert_eq!(meta.get_i32("connections"), Some(2));
        assert_eq!(meta.get_i32("bytesRead"), Some(i32::MAX));
        assert_eq!(meta.get_i32("routes"), Some(0));
        assert_eq!(stats.to_json()["connections"], json!({"count": 2, "max": 3}));
    }
}
