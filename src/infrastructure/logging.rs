//! Tracing bootstrap.

use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Holds the non-blocking writer guard for the process lifetime.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize tracing per the logging configuration.
///
/// Stdout respects the configured format; when a log directory is set, a
/// daily-rolling JSON file layer is added.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let default_level: Level = config.level.parse().unwrap_or(Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let file_parts = config.log_dir.as_ref().map(|dir| {
        let appender = rolling::daily(dir, "hephaestus.log");
        tracing_appender::non_blocking(appender)
    });

    match file_parts {
        Some((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy());

            if config.format == "json" {
                let stdout = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(file_layer).with(stdout).init();
            } else {
                let stdout = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(file_layer).with(stdout).init();
            }
            Ok(LogGuard { _guard: Some(guard) })
        }
        None => {
            if config.format == "json" {
                let stdout = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout).init();
            } else {
                let stdout = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(stdout).init();
            }
            Ok(LogGuard { _guard: None })
        }
    }
}
