//! Forwards `log` records emitted by the core to the host application.

use std::sync::{Arc, OnceLock};

/// Receives log lines from the core.
///
/// Implemented by the host app and installed once with [`set_logger`].
///
/// ## Swift
///
/// ```swift
/// final class FlowGateLogBridge: FlowGate.Logger {
///     func log(level: FlowGate.LogLevel, message: String) {
///         os_log("%{public}@", log: .flowgate, type: level.osLogType, message)
///     }
/// }
///
/// FlowGate.setLogger(logger: FlowGateLogBridge(), maxLevel: .info)
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Handles one log line.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log line, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Lifecycle milestones (restore finished, signed out, ...).
    Info,
    /// Recoverable problems such as a failed best-effort revoke.
    Warn,
    /// Failures surfaced to the caller.
    Error,
}

impl LogLevel {
    const fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        // dependencies (reqwest, hyper, ...) only get through at info and above
        metadata.level() <= log::Level::Info || metadata.target().starts_with("flowgate")
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(record.level().into(), format_record(record));
        }
    }

    fn flush(&self) {}
}

fn format_record(record: &log::Record) -> String {
    let target = record.target();
    if target.starts_with("flowgate") {
        format!("{}", record.args())
    } else {
        format!("[{target}] {}", record.args())
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the host logger and sets the most verbose level forwarded.
///
/// Only the first call installs a logger. Later calls only adjust `max_level`.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>, max_level: LogLevel) {
    if LOGGER_INSTANCE.set(logger).is_ok() {
        static LOGGER: ForeignLogger = ForeignLogger;
        if let Err(err) = log::set_logger(&LOGGER) {
            eprintln!("flowgate: another logger is already installed: {err}");
        }
    }
    log::set_max_level(max_level.to_filter());
}
