//! Structured logging for the `rls` tool
//!
//! Console output goes to stderr so that command results on stdout stay
//! machine-readable. Files rotate daily.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "rls.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("json") => LogFormat::Json,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }

    /// Parse from `LOG_FORMAT`
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Console only; writes to stderr so stdout stays free for command output
    Console,
    /// Log to file only
    File,
    /// Console and file
    Both,
}

impl LogOutput {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            // "stdout" is accepted for older configs
            _ => LogOutput::Console,
        }
    }

    /// Parse from `LOG_OUTPUT`
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_OUTPUT").ok().as_deref())
    }
}

fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_appender() -> RollingFileAppender {
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&log_dir).ok();
    RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME)
}

/// Initialize logging from the environment
///
/// Environment variables:
/// - `RUST_LOG`: Log level (e.g., "debug", "info", "rls_registry=debug")
/// - `LOG_FORMAT`: Output format ("pretty", "json", "compact")
/// - `LOG_OUTPUT`: Where to write logs ("console", "file", "both")
/// - `LOG_DIR`: Directory for log files (default: "./logs")
///
/// ```bash
/// # Watch schemas with JSON logs in a file
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/rls rls watch
///
/// # Debug a single decision
/// RUST_LOG=rls_engine=debug rls decide --entity Review --principal '{"role":"admin"}'
/// ```
pub fn init() {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        LogOutput::Console => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer(format))
                .init();
        }
        LogOutput::File => {
            let file_layer = fmt::layer()
                .with_writer(file_appender())
                .with_ansi(false);

            match format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer.json().boxed())
                    .init(),
                _ => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer.boxed())
                    .init(),
            }
        }
        LogOutput::Both => {
            let file_layer = fmt::layer()
                .with_writer(file_appender())
                .with_ansi(false)
                .boxed();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer(format))
                .with(file_layer)
                .init();
        }
    }

    tracing::debug!(format = ?format, output = ?output, "logging initialized");
}

/// Helper macro for logging with structured fields
///
/// Usage:
/// ```ignore
/// log_event!(
///     level: tracing::Level::INFO,
///     event: "access_decision",
///     entity: "Review",
///     allow: true
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("compact")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("xml")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }

    #[test]
    fn test_log_output_parse() {
        assert_eq!(LogOutput::parse(Some("file")), LogOutput::File);
        assert_eq!(LogOutput::parse(Some("both")), LogOutput::Both);
        assert_eq!(LogOutput::parse(Some("console")), LogOutput::Console);
        assert_eq!(LogOutput::parse(Some("stdout")), LogOutput::Console);
        assert_eq!(LogOutput::parse(None), LogOutput::Console);
    }
}
