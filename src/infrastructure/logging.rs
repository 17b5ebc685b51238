//! Logging setup for hosts embedding the bridge
//!
//! The bridge itself only emits `tracing` events and spans. Hosts that have
//! no subscriber of their own can install one from here.

use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Whether to include span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g., "pybridge::interop=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `PYBRIDGE_LOG_LEVEL`, `PYBRIDGE_LOG_JSON`, `PYBRIDGE_LOG_FILE` and
    /// `PYBRIDGE_LOG_SPANS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("PYBRIDGE_LOG_LEVEL") {
            config.level = level.parse().unwrap_or(Level::INFO);
        }

        if std::env::var("PYBRIDGE_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        if let Ok(dir) = std::env::var("PYBRIDGE_LOG_FILE") {
            config.output = LogOutput::File {
                directory: dir,
                prefix: "pybridge".to_string(),
            };
        }

        config.span_events = std::env::var("PYBRIDGE_LOG_SPANS").is_ok();
        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Install the global subscriber.
///
/// Only the first call in a process has an effect; later calls return `None`.
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let (writer, worker) = match &config.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File { directory, prefix } => {
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
        };
        install(&config, writer);
        guard = Some(worker);
    });
    guard
}

fn install<W>(config: &LogConfig, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(config);
    let span_events = span_events_config(config.span_events);

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
    };

    // A host may already own the global subscriber.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str.split(',').fold(base_filter, |filter, directive| {
            match directive.trim().parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(_) => {
                    eprintln!("Invalid log filter directive: {}", directive);
                    filter
                }
            }
        }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Verbose stderr logging for development
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("pybridge=debug".to_string()),
    })
}

/// JSON logs in daily-rotated files
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "pybridge".to_string(),
        },
        span_events: false,
        filter: Some("pybridge=info".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("pybridge=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter, Some("pybridge=trace".to_string()));
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("PYBRIDGE_LOG_LEVEL", "trace");
        std::env::set_var("PYBRIDGE_LOG_JSON", "1");
        std::env::set_var("PYBRIDGE_LOG_FILE", "/var/log/host");
        std::env::set_var("PYBRIDGE_LOG_SPANS", "1");
        let config = LogConfig::from_env();

        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(
            config.output,
            LogOutput::File {
                directory: "/var/log/host".to_string(),
                prefix: "pybridge".to_string(),
            }
        );
        assert!(config.span_events);

        std::env::set_var("PYBRIDGE_LOG_LEVEL", "chatty");
        std::env::remove_var("PYBRIDGE_LOG_JSON");
        std::env::remove_var("PYBRIDGE_LOG_FILE");
        std::env::remove_var("PYBRIDGE_LOG_SPANS");
        let config = LogConfig::from_env();
        std::env::remove_var("PYBRIDGE_LOG_LEVEL");

        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(!config.span_events);
    }

    #[test]
    fn test_filter_directives() {
        let config = LogConfig::new().with_filter("pybridge::interop=trace, not a directive");
        let filter = build_filter(&config).to_string();
        assert!(filter.contains("pybridge::interop=trace"));
        assert_eq!(span_events_config(false), FmtSpan::NONE);
    }

    #[test]
    fn test_second_init_is_noop() {
        let _first = init_logging(LogConfig::new().with_level(Level::WARN));
        assert!(init_logging(LogConfig::new()).is_none());
        assert!(init_dev_logging().is_none());
        assert!(init_prod_logging(std::env::temp_dir()).is_none());
    }
}
