//! Logging system configuration and initialization
//!
//! - Console and file output, each optional
//! - Daily rotated log files written through a non-blocking appender
//! - Structured JSON file logs (optional)
//! - `RUST_LOG` overrides the configured filter

#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the file writer alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Directives applied unless the configured level asks for TRACE
const QUIET_DEPENDENCIES: &[&str] = &["sqlx::query=warn", "sqlx::sqlite=warn", "sqlx::migrate=info", "tokio=info"];

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Unparsable directives are skipped rather than failing startup.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = EnvFilter::new(&config.level);

    if !config.level.to_lowercase().contains("trace") {
        for directive in QUIET_DEPENDENCIES {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    for (module, level) in &config.module_filters {
        match format!("{}={}", module, level).parse() {
            Ok(parsed) => filter = filter.add_directive(parsed),
            Err(e) => eprintln!("Ignoring invalid log filter {}={}: {}", module, level, e),
        }
    }

    if let Ok(own) = format!("price_tracker_lib={}", config.level).parse() {
        filter = filter.add_directive(own);
    }
    filter
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_env_filter(config));

    let file_writer = if config.file_output {
        let log_dir = config.resolved_log_dir();
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

        let (writer, guard) = non_blocking(rolling::daily(&log_dir, &config.file_name));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);
        Some(writer)
    } else {
        None
    };

    let console_layer = config
        .console_output
        .then(|| fmt::Layer::new().with_writer(std::io::stdout).with_target(false));

    let (json_file_layer, plain_file_layer) = match file_writer {
        Some(writer) if config.json_format => (
            Some(
                fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false),
            ),
            None,
        ),
        Some(writer) => (
            None,
            Some(fmt::Layer::new().with_writer(writer).with_target(false).with_ansi(false)),
        ),
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(json_file_layer)
        .with(plain_file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log directory: {:?}", config.resolved_log_dir());
    }
    info!("JSON format: {}", config.json_format);

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Price Tracker System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}
