//! Logging configuration
//!
//! The live progress display owns the terminal while a deployment runs, so
//! tracing output goes to a file under the config directory by default.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::DockhandError;

/// Name of the tracing log file inside the log directory
pub const LOG_FILE_NAME: &str = "dockhand.log";

/// Log level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl serde::Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_filter_string())
    }
}

impl<'de> serde::Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Write logs to stderr instead of the log file
    pub stderr: bool,

    /// Log directory for file output
    pub log_dir: PathBuf,

    /// Enable JSON format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stderr: false,
            log_dir: PathBuf::from("logs"),
            json_format: false,
        }
    }
}

/// Initialize logging
///
/// The returned guard flushes the background writer when dropped and must be
/// held for as long as the process logs.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, DockhandError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.to_filter_string()));

    let subscriber = tracing_subscriber::registry().with(filter);

    if options.stderr {
        let layer = fmt::layer().with_writer(std::io::stderr);
        return if options.json_format {
            subscriber
                .with(layer.json())
                .try_init()
                .map(|_| None)
                .map_err(|e| DockhandError::LoggingError(e.to_string()))
        } else {
            subscriber
                .with(layer)
                .try_init()
                .map(|_| None)
                .map_err(|e| DockhandError::LoggingError(e.to_string()))
        };
    }

    std::fs::create_dir_all(&options.log_dir)?;
    let appender = tracing_appender::rolling::never(&options.log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_writer(writer).with_ansi(false);

    if options.json_format {
        subscriber
            .with(layer.json())
            .try_init()
            .map_err(|e| DockhandError::LoggingError(e.to_string()))?;
    } else {
        subscriber
            .with(layer)
            .try_init()
            .map_err(|e| DockhandError::LoggingError(e.to_string()))?;
    }

    Ok(Some(guard))
}
