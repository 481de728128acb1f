use std::net::IpAddr;
use std::time::Duration;

use structopt::StructOpt;

use bolt_utils::{to_duration, Bytesize};

/// Command line flags. Every flag overrides the matching `[broker]` key.
#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(name = "boltd", about = "Lightweight topic-based message broker")]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Listening address
    #[structopt(long)]
    pub host: Option<IpAddr>,

    /// Listening port
    #[structopt(short = "p", long)]
    pub port: Option<u16>,

    /// Largest accepted frame body, e.g. 10M
    #[structopt(long)]
    pub max_message_size: Option<Bytesize>,

    /// Socket read buffer size, e.g. 100K
    #[structopt(long)]
    pub input_buffer_size: Option<Bytesize>,

    /// Upper bound of a single coalesced write, e.g. 100K
    #[structopt(long)]
    pub output_buffer_size: Option<Bytesize>,

    /// Undelivered input above which a connection stops being read
    #[structopt(long)]
    pub input_buffer_limit: Option<Bytesize>,

    /// Connections handled by one I/O manager thread
    #[structopt(long)]
    pub clients_per_manager: Option<usize>,

    /// Readiness wait bound, e.g. 100ms
    #[structopt(long, parse(from_str = to_duration))]
    pub selection_timeout: Option<Duration>,

    /// How often connections are checked for activity, e.g. 5s
    #[structopt(long, parse(from_str = to_duration))]
    pub inactivity_interval: Option<Duration>,

    /// Silence after which a connection is dropped, e.g. 10s
    #[structopt(long, parse(from_str = to_duration))]
    pub inactivity_timeout: Option<Duration>,

    /// Listen backlog
    #[structopt(long)]
    pub backlog_size: Option<i32>,

    /// Capacity of the processor queue
    #[structopt(long)]
    pub queue_size: Option<usize>,

    /// Log at debug level
    #[structopt(short = "v", long)]
    pub verbose: bool,
}
