#![deny(unsafe_code)]

//! Layered configuration of the bolt broker.
//!
//! Sources, lowest precedence first: `/etc/bolt/bolt.toml`, `./bolt.toml`,
//! environment variables such as `BOLT__BROKER__PORT` (prefix `BOLT`, every
//! level separated by `__`), the file named by `--config`, and finally
//! command line flags.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use bolt_utils::*;

use self::logging::{Level, Log};

pub use self::options::Options;

pub mod logging;
pub mod options;

pub type Result<T, E = anyhow::Error> = anyhow::Result<T, E>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub broker: Broker,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// `BOLT__<SECTION>__<KEY>` variables, e.g. `BOLT__BROKER__PORT=9200`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("bolt").separator("__").try_parsing(true)
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/bolt/bolt").required(false))
            .add_source(File::with_name("bolt").required(false))
            .add_source(environment());

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        inner.broker.apply(&opts);
        if opts.verbose {
            inner.log.level = Level::new(slog::Level::Debug);
        }
        inner.broker.check()?;

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance();
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("listen address is {}", cfg.broker.laddr());
        log::info!(
            "max_message_size is {}, input_buffer_size is {}, output_buffer_size is {}, input_buffer_limit is {}",
            cfg.broker.max_message_size,
            cfg.broker.input_buffer_size,
            cfg.broker.output_buffer_size,
            cfg.broker.input_buffer_limit
        );
        log::info!(
            "clients_per_manager is {}, queue_size is {}, backlog_size is {}",
            cfg.broker.clients_per_manager,
            cfg.broker.queue_size,
            cfg.broker.backlog_size
        );
        log::info!(
            "selection_timeout is {:?}, inactivity_interval is {:?}, inactivity_timeout is {:?}",
            cfg.broker.selection_timeout,
            cfg.broker.inactivity_interval,
            cfg.broker.inactivity_timeout
        );
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Broker {
    #[serde(default = "Broker::host_default")]
    pub host: IpAddr,
    #[serde(default = "Broker::port_default")]
    pub port: u16,
    #[serde(default = "Broker::reuseaddr_default")]
    pub reuseaddr: bool,
    #[serde(default = "Broker::backlog_size_default")]
    pub backlog_size: i32,

    //Largest frame body accepted from a client.
    #[serde(default = "Broker::max_message_size_default")]
    pub max_message_size: Bytesize,
    //Size of each socket read.
    #[serde(default = "Broker::input_buffer_size_default")]
    pub input_buffer_size: Bytesize,
    //Upper bound of one coalesced socket write.
    #[serde(default = "Broker::output_buffer_size_default")]
    pub output_buffer_size: Bytesize,
    //Undelivered input above which a connection is no longer read.
    #[serde(default = "Broker::input_buffer_limit_default")]
    pub input_buffer_limit: Bytesize,

    #[serde(default = "Broker::clients_per_manager_default")]
    pub clients_per_manager: usize,
    #[serde(default = "Broker::queue_size_default")]
    pub queue_size: usize,

    #[serde(default = "Broker::selection_timeout_default", deserialize_with = "deserialize_duration")]
    pub selection_timeout: Duration,
    #[serde(default = "Broker::inactivity_interval_default", deserialize_with = "deserialize_duration")]
    pub inactivity_interval: Duration,
    #[serde(default = "Broker::inactivity_timeout_default", deserialize_with = "deserialize_duration")]
    pub inactivity_timeout: Duration,
}

impl Default for Broker {
    #[inline]
    fn default() -> Self {
        Self {
            host: Self::host_default(),
            port: Self::port_default(),
            reuseaddr: Self::reuseaddr_default(),
            backlog_size: Self::backlog_size_default(),
            max_message_size: Self::max_message_size_default(),
            input_buffer_size: Self::input_buffer_size_default(),
            output_buffer_size: Self::output_buffer_size_default(),
            input_buffer_limit: Self::input_buffer_limit_default(),
            clients_per_manager: Self::clients_per_manager_default(),
            queue_size: Self::queue_size_default(),
            selection_timeout: Self::selection_timeout_default(),
            inactivity_interval: Self::inactivity_interval_default(),
            inactivity_timeout: Self::inactivity_timeout_default(),
        }
    }
}

impl Broker {
    fn host_default() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
    fn port_default() -> u16 {
        9100
    }
    fn reuseaddr_default() -> bool {
        true
    }
    fn backlog_size_default() -> i32 {
        50
    }
    fn max_message_size_default() -> Bytesize {
        Bytesize::from("10M")
    }
    fn input_buffer_size_default() -> Bytesize {
        Bytesize::from("100K")
    }
    fn output_buffer_size_default() -> Bytesize {
        Bytesize::from("100K")
    }
    fn input_buffer_limit_default() -> Bytesize {
        Bytesize::from("1M")
    }
    fn clients_per_manager_default() -> usize {
        64
    }
    fn queue_size_default() -> usize {
        1000
    }
    fn selection_timeout_default() -> Duration {
        Duration::from_millis(100)
    }
    fn inactivity_interval_default() -> Duration {
        Duration::from_secs(5)
    }
    fn inactivity_timeout_default() -> Duration {
        Duration::from_secs(10)
    }

    #[inline]
    pub fn laddr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    fn apply(&mut self, opts: &Options) {
        if let Some(host) = opts.host {
            self.host = host;
        }
        if let Some(port) = opts.port {
            self.port = port;
        }
        if let Some(v) = opts.max_message_size {
            self.max_message_size = v;
        }
        if let Some(v) = opts.input_buffer_size {
            self.input_buffer_size = v;
        }
        if let Some(v) = opts.output_buffer_size {
            self.output_buffer_size = v;
        }
        if let Some(v) = opts.input_buffer_limit {
            self.input_buffer_limit = v;
        }
        if let Some(v) = opts.clients_per_manager {
            self.clients_per_manager = v;
        }
        if let Some(v) = opts.selection_timeout {
            self.selection_timeout = v;
        }
        if let Some(v) = opts.inactivity_interval {
            self.inactivity_interval = v;
        }
        if let Some(v) = opts.inactivity_timeout {
            self.inactivity_timeout = v;
        }
        if let Some(v) = opts.backlog_size {
            self.backlog_size = v;
        }
        if let Some(v) = opts.queue_size {
            self.queue_size = v;
        }
    }

    /// Rejects values the broker cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.clients_per_manager == 0 {
            return Err(anyhow!("broker.clients_per_manager must be at least 1"));
        }
        if self.queue_size == 0 {
            return Err(anyhow!("broker.queue_size must be at least 1"));
        }
        if self.input_buffer_size.as_usize() == 0 || self.output_buffer_size.as_usize() == 0 {
            return Err(anyhow!("broker buffer sizes must be non-zero"));
        }
        if self.selection_timeout.is_zero() {
            return Err(anyhow!("broker.selection_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;
    use structopt::StructOpt;

    use super::*;

    fn parse(toml: &str) -> Inner {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let inner = parse("");
        let b = &inner.broker;
        assert_eq!(b.port, 9100);
        assert_eq!(b.max_message_size.as_usize(), 10 * 1024 * 1024);
        assert_eq!(b.input_buffer_size.as_usize(), 100 * 1024);
        assert_eq!(b.output_buffer_size.as_usize(), 100 * 1024);
        assert_eq!(b.input_buffer_limit.as_usize(), 1024 * 1024);
        assert_eq!(b.clients_per_manager, 64);
        assert_eq!(b.queue_size, 1000);
        assert_eq!(b.backlog_size, 50);
        assert_eq!(b.selection_timeout, Duration::from_millis(100));
        assert_eq!(b.inactivity_interval, Duration::from_secs(5));
        assert_eq!(b.inactivity_timeout, Duration::from_secs(10));
        assert_eq!(inner.log.to, logging::To::Console);
        assert_eq!(inner.log.level.inner(), slog::Level::Info);
        assert!(b.check().is_ok());
    }

    #[test]
    fn test_file_values() {
        let inner = parse(
            r#"
            [broker]
            port = 9200
            max_message_size = "1M"
            clients_per_manager = 8
            selection_timeout = "20ms"
            inactivity_timeout = "1m"

            [log]
            to = "both"
            level = "debug"
            dir = "/tmp/bolt/"
            "#,
        );
        assert_eq!(inner.broker.port, 9200);
        assert_eq!(inner.broker.max_message_size, Bytesize(1024 * 1024));
        assert_eq!(inner.broker.clients_per_manager, 8);
        assert_eq!(inner.broker.selection_timeout, Duration::from_millis(20));
        assert_eq!(inner.broker.inactivity_timeout, Duration::from_secs(60));
        assert!(inner.log.to.file() && inner.log.to.console());
        assert_eq!(inner.log.level.inner(), slog::Level::Debug);
        assert_eq!(inner.log.filename(), "/tmp/bolt/bolt.log");
    }

    #[test]
    fn test_environment_variables() {
        let mut vars = config::Map::<String, String>::new();
        vars.insert("BOLT__BROKER__PORT".into(), "9300".into());
        vars.insert("BOLT__LOG__LEVEL".into(), "warn".into());
        vars.insert("BOLT_BROKER_QUEUE_SIZE".into(), "7".into());
        let inner: Inner = Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(inner.broker.port, 9300);
        assert_eq!(inner.log.level.inner(), slog::Level::Warning);
        assert_eq!(inner.broker.queue_size, 1000);
    }

    #[test]
    fn test_command_line_overrides() {
        let opts = Options::from_iter([
            "boltd",
            "--port",
            "9300",
            "--max-message-size",
            "2M",
            "--selection-timeout",
            "50ms",
            "--queue-size",
            "5",
            "-v",
        ]);
        let mut broker = parse("[broker]\nport = 9200\nqueue_size = 10").broker;
        broker.apply(&opts);
        assert_eq!(broker.port, 9300);
        assert_eq!(broker.max_message_size.as_usize(), 2 * 1024 * 1024);
        assert_eq!(broker.selection_timeout, Duration::from_millis(50));
        assert_eq!(broker.queue_size, 5);
        assert!(opts.verbose);
    }

    #[test]
    fn test_check_rejects_zero_capacity() {
        let broker = Broker { clients_per_manager: 0, ..Default::default() };
        assert!(broker.check().is_err());
        let broker = Broker { queue_size: 0, ..Default::default() };
        assert!(broker.check().is_err());
    }
}
