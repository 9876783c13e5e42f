use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::sync::OnceLock;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 256;

static LOGGER: OnceLock<ChannelLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Logger that writes to stderr and republishes every record to subscribers
pub struct ChannelLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl ChannelLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { sender, level }
    }

    /// Installs the logger as the global `log` backend.
    pub fn init(level: Level) -> Result<&'static ChannelLogger, SetLoggerError> {
        let logger = LOGGER.get_or_init(|| ChannelLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))?;
        Ok(logger)
    }

    /// The installed logger, if `init` succeeded
    pub fn global() -> Option<&'static ChannelLogger> {
        LOGGER.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };

        // No subscribers is fine
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Installs the channel logger, falling back to `env_logger` when another
/// logger is already set.
pub fn init(level: Level) {
    if ChannelLogger::init(level).is_err() {
        let _ = fallback_builder(level).try_init();
    }
}

fn fallback_builder(level: Level) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level.to_level_filter());
    builder
}
