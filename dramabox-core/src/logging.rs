use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` wins over the configured level. Output is JSON or pretty
/// text, written to stderr or appended to `file_path`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?,
        )),
        None => None,
    };

    let format = parse_format(&config.format)?;

    let result = if format == LogFormat::Json {
        // JSON format for production (structured logging)
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        match file {
            Some(file) => registry.with(json_layer.with_writer(file)).try_init(),
            None => registry.with(json_layer.with_writer(std::io::stderr)).try_init(),
        }
    } else {
        // Pretty format for development (human-readable)
        let pretty_layer = fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_line_number(true)
            .with_file(false);

        match file {
            Some(file) => registry
                .with(pretty_layer.with_ansi(false).with_writer(file))
                .try_init(),
            None => registry.with(pretty_layer.with_writer(std::io::stderr)).try_init(),
        }
    };

    result.context("a global tracing subscriber is already installed")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

fn parse_format(format: &str) -> anyhow::Result<LogFormat> {
    match format.to_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" | "text" => Ok(LogFormat::Pretty),
        _ => Err(anyhow::anyhow!("Invalid log format: {format}")),
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("DEBUG").is_ok());
        assert!(parse_log_level("info").is_ok());
        assert!(parse_log_level("warning").is_ok());
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("json").unwrap(), LogFormat::Json);
        assert_eq!(parse_format("Pretty").unwrap(), LogFormat::Pretty);
        assert!(parse_format("xml").is_err());
    }

    #[test]
    fn test_init_logging_rejects_bad_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
