use std::fs::{self, File, OpenOptions};
use std::io::{self, Stdout};
use std::path::Path;

use anyhow::Result;
use slog::*;

use crate::conf::logging::{Log, To};

pub use slog::Logger;

/// Builds the slog drain from `cfg` and routes the `log` facade into it.
pub fn logger_init(cfg: &Log) -> Result<Logger> {
    let logger = config_logger(cfg)?;
    log::set_boxed_logger(Box::new(LoggerEx(logger.clone())))
        .map_err(|e| anyhow::anyhow!("logger init failed, {}", e))?;
    log::set_max_level(slog_log_to_level(cfg.level.inner()).to_level_filter());
    Ok(logger)
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&slog::Record::new(&s, args, b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error | slog::Level::Critical => log::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

fn timestamp(io: &mut dyn io::Write) -> io::Result<()> {
    write!(io, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}

pub fn config_logger(cfg: &Log) -> Result<Logger> {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(cfg)?);
    let drain = slog_term::FullFormat::new(decorator).use_custom_timestamp(timestamp).build().fuse();

    let drain = LevelFilter { drain, level: cfg.level.inner() }.fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .thread_name("bolt-logger".into())
        .build()
        .fuse();

    Ok(slog::Logger::root(drain, o!()))
}

struct LevelFilter<D> {
    drain: D,
    level: slog::Level,
}

impl<D> Drain for LevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(&self, record: &slog::Record, values: &slog::OwnedKVList) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.level) {
            self.drain.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

struct WriteFilter {
    to: To,
    file: Option<File>,
    console: Stdout,
}

impl WriteFilter {
    fn new(cfg: &Log) -> Result<Self> {
        let file = if cfg.to.file() { Some(open_file(&cfg.filename())?) } else { None };
        Ok(Self { to: cfg.to, file, console: io::stdout() })
    }
}

impl io::Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.to.console() {
            self.console.write_all(buf)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.to.console() {
            self.console.flush()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_file(filename: &str) -> Result<File> {
    if let Some(dir) = Path::new(filename).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
        .map_err(|e| anyhow::Error::msg(format!("logger file config error, filename: {}, {:?}", filename, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        for level in [log::Level::Trace, log::Level::Debug, log::Level::Info, log::Level::Warn, log::Level::Error] {
            assert_eq!(slog_log_to_level(log_to_slog_level(level)), level);
        }
        assert_eq!(slog_log_to_level(slog::Level::Critical), log::Level::Error);
    }

    #[test]
    fn test_file_logger() {
        let dir = std::env::temp_dir().join(format!("bolt-logger-{}", std::process::id()));
        let cfg = Log { to: To::File, dir: dir.to_string_lossy().into_owned(), ..Default::default() };
        let logger = config_logger(&cfg).unwrap();
        slog::info!(logger, "written to file");
        slog::debug!(logger, "filtered out");
        drop(logger);
        std::thread::sleep(std::time::Duration::from_millis(200));
        let text = fs::read_to_string(cfg.filename()).unwrap();
        assert!(text.contains("written to file"));
        assert!(!text.contains("filtered out"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_logger_init_routes_log_records() {
        let dir = std::env::temp_dir().join(format!("bolt-logger-init-{}", std::process::id()));
        let cfg = Log { to: To::File, dir: dir.to_string_lossy().into_owned(), ..Default::default() };
        let logger = logger_init(&cfg).unwrap();
        assert_eq!(log::max_level(), log::LevelFilter::Info);
        log::info!("bridged from the log facade");
        log::debug!("below the configured level");
        drop(logger);
        std::thread::sleep(std::time::Duration::from_millis(200));
        let text = fs::read_to_string(cfg.filename()).unwrap();
        assert!(text.contains("bridged from the log facade"));
        assert!(!text.contains("below the configured level"));
        assert!(logger_init(&cfg).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
