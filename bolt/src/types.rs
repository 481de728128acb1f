use std::fmt;

pub use bolt_codec::{Message, MessageKind, Meta, Value};
pub use bolt_utils::{Counter, TimestampMillis};

pub type HashMap<K, V> = ahash::AHashMap<K, V>;
pub type HashSet<V> = ahash::AHashSet<V>;
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

pub type ClientId = u64;

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    ConnectionClosed,
    Goodbye,
    InactivityTimeout,
    MaxMessageSize(usize),
    Corrupt(String),
    Io(String),
    Shutdown,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::ConnectionClosed => write!(f, "connection closed by peer"),
            Reason::Goodbye => write!(f, "goodbye"),
            Reason::InactivityTimeout => write!(f, "inactivity timeout"),
            Reason::MaxMessageSize(size) => write!(f, "message of {} bytes exceeds the maximum size", size),
            Reason::Corrupt(e) => write!(f, "bad data format, {}", e),
            Reason::Io(e) => write!(f, "io error, {}", e),
            Reason::Shutdown => write!(f, "shutdown"),
        }
    }
}
