//! Logging setup

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Filter directive for a log setting: a bare level applies to this crate,
/// anything else is taken as an `EnvFilter` directive
pub fn filter_directive(setting: &str) -> String {
    match LogLevel::from_str(setting.trim()) {
        Some(level) => format!("featurepool={}", level.to_tracing_level()),
        None => setting.trim().to_string(),
    }
}

/// Initialize the logger with specified level
pub fn init_logger(level: LogLevel) {
    init_logger_with(&format!("featurepool={}", level.to_tracing_level()));
}

/// Initialize the logger from a filter directive, falling back to `info`
/// when the directive does not parse
pub fn init_logger_with(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directive:?}: {e}; using info");
        EnvFilter::new("featurepool=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
