//! Structured logging
//!
//! One global `tracing` subscriber: an `EnvFilter` (`RUST_LOG` wins over the
//! configured level) and a JSON or text formatter writing through a
//! non-blocking stdout or rolling-file writer.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Keeps the background log writer alive; drop it last
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(std::io::stdout()),
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;
                let rotation = parse_rotation(&config.rotation)?;
                let appender = create_rolling_appender(log_file, rotation)?;
                tracing_appender::non_blocking(appender)
            }
            _ => {
                anyhow::bail!("Invalid output configuration: {}", config.output);
            }
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_ansi(config.output == "stdout")
                .with_thread_names(true)
                .with_target(true)
                .boxed(),
            _ => {
                anyhow::bail!("Invalid format configuration: {}", config.format);
            }
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            rotation = %config.rotation,
            "Logging system initialized"
        );

        Ok(Logger { _guard: Some(guard) })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

fn parse_rotation(rotation: &str) -> Result<Rotation> {
    match rotation {
        "never" => Ok(Rotation::NEVER),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        _ => anyhow::bail!("Invalid log rotation: {}", rotation),
    }
}

fn create_rolling_appender(log_file: &Path, rotation: Rotation) -> Result<RollingFileAppender> {
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory).context("Failed to create log directory")?;

    let filename = log_file
        .file_name()
        .context("Log file must have a filename")?;

    Ok(RollingFileAppender::new(rotation, directory, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation("never").unwrap(), Rotation::NEVER);
        assert_eq!(parse_rotation("daily").unwrap(), Rotation::DAILY);
        assert!(parse_rotation("weekly").is_err());
    }

    #[test]
    fn test_rolling_appender_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("logs").join("catalog.log");

        let mut appender = create_rolling_appender(&log_file, Rotation::NEVER).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let written = std::fs::read_to_string(&log_file).unwrap();
        assert_eq!(written, "hello\n");
    }
}
