//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional `config/price-tracker.{toml,json,yaml}` file (or the same file
//! under the user config directory), then `PRICE_TRACKER__SECTION__KEY`
//! environment variables.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::errors::{TrackerError, TrackerResult};

pub const APP_DIR_NAME: &str = "price-tracker";
pub const ENV_PREFIX: &str = "PRICE_TRACKER";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub ingestion: IngestionConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:///var/lib/price-tracker/db.sqlite`
    pub url: String,
    pub max_connections: u32,
}

/// Background sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Wake interval of the sweep loop
    pub poll_interval_secs: u64,
    /// Pages fetched per scheduled discovery run
    pub discovery_max_pages: u32,
    /// Pause between scheduled page fetches
    pub page_delay_ms: u64,
    /// Upper bound of the random extra pause added to `page_delay_ms`
    pub page_delay_jitter_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Bound on each provider call
    pub fetch_timeout_secs: u64,
    /// Bound on a whole variant discovery chain
    pub discovery_deadline_secs: u64,
    pub interactive_max_pages: u32,
    pub interactive_page_delay_ms: u64,
    pub progress_buffer: usize,
    /// Directory of captured provider responses replayed by the offline
    /// provider; defaults to `<data dir>/captures`
    pub capture_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub price_history_days: u32,
    /// Untracked products not seen for this long are deactivated
    pub inactive_product_days: u32,
    pub run_log_days: u32,
    pub export_history_days: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data_local_dir>/price-tracker/logs`
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            discovery_max_pages: defaults::DISCOVERY_MAX_PAGES,
            page_delay_ms: defaults::SCHEDULED_PAGE_DELAY_MS,
            page_delay_jitter_ms: defaults::PAGE_DELAY_JITTER_MS,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            discovery_deadline_secs: defaults::DISCOVERY_DEADLINE_SECS,
            interactive_max_pages: defaults::INTERACTIVE_MAX_PAGES,
            interactive_page_delay_ms: defaults::INTERACTIVE_PAGE_DELAY_MS,
            progress_buffer: defaults::PROGRESS_BUFFER,
            capture_dir: None,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            price_history_days: defaults::PRICE_HISTORY_DAYS,
            inactive_product_days: defaults::INACTIVE_PRODUCT_DAYS,
            run_log_days: defaults::RUN_LOG_DAYS,
            export_history_days: defaults::EXPORT_HISTORY_DAYS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            module_filters: HashMap::from([
                ("sqlx".to_string(), "warn".to_string()),
                ("tokio".to_string(), "info".to_string()),
            ]),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Configured delay plus a random jitter in `0..=page_delay_jitter_ms`
    pub fn page_delay(&self) -> Duration {
        let jitter = if self.page_delay_jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.page_delay_jitter_ms)
        };
        Duration::from_millis(self.page_delay_ms.saturating_add(jitter))
    }
}

impl IngestionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn discovery_deadline(&self) -> Duration {
        Duration::from_secs(self.discovery_deadline_secs)
    }

    pub fn interactive_page_delay(&self) -> Duration {
        Duration::from_millis(self.interactive_page_delay_ms)
    }

    pub fn resolved_capture_dir(&self) -> PathBuf {
        self.capture_dir.clone().unwrap_or_else(|| app_data_dir().join("captures"))
    }
}

impl LoggingConfig {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| app_data_dir().join("logs"))
    }
}

impl AppConfig {
    /// Loads defaults, the optional config files and the environment
    pub fn load() -> Result<Self> {
        let user_file = dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config"));
        Self::load_from(Path::new("config").join(APP_DIR_NAME).as_path(), user_file.as_deref())
    }

    /// Same layering with explicit file stems; both files are optional
    pub fn load_from(local_stem: &Path, user_stem: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(user_stem) = user_stem {
            builder = builder.add_source(config::File::with_name(&user_stem.to_string_lossy()).required(false));
        }
        let settings = builder
            .add_source(config::File::with_name(&local_stem.to_string_lossy()).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;

        info!("Configuration loaded (database: {})", config.database.url);
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let invalid = |message: &str| Err(TrackerError::Config(message.to_string()));

        if self.scheduler.poll_interval_secs == 0 {
            return invalid("scheduler.poll_interval_secs must be greater than 0");
        }
        if self.scheduler.discovery_max_pages == 0 || self.ingestion.interactive_max_pages == 0 {
            return invalid("max page counts must be greater than 0");
        }
        if self.ingestion.fetch_timeout_secs == 0 {
            return invalid("ingestion.fetch_timeout_secs must be greater than 0");
        }
        if self.ingestion.discovery_deadline_secs == 0 {
            return invalid("ingestion.discovery_deadline_secs must be greater than 0");
        }
        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0");
        }
        if !self.logging.console_output && !self.logging.file_output {
            return invalid("at least one logging output must be enabled");
        }
        Ok(())
    }
}

/// `<data_local_dir>/price-tracker`, or the working directory when the
/// platform has no data directory
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_database_url() -> String {
    format!("sqlite://{}", app_data_dir().join(defaults::DB_FILE_NAME).display())
}

/// Default configuration values
pub mod defaults {
    /// Hourly sweep
    pub const POLL_INTERVAL_SECS: u64 = 3600;
    pub const DISCOVERY_MAX_PAGES: u32 = 2;
    pub const SCHEDULED_PAGE_DELAY_MS: u64 = 3000;
    pub const PAGE_DELAY_JITTER_MS: u64 = 500;

    pub const FETCH_TIMEOUT_SECS: u64 = 30;
    pub const DISCOVERY_DEADLINE_SECS: u64 = 120;
    pub const INTERACTIVE_MAX_PAGES: u32 = 5;
    pub const INTERACTIVE_PAGE_DELAY_MS: u64 = 1000;
    pub const PROGRESS_BUFFER: usize = 64;

    pub const PRICE_HISTORY_DAYS: u32 = 90;
    pub const INACTIVE_PRODUCT_DAYS: u32 = 30;
    pub const RUN_LOG_DAYS: u32 = 60;
    pub const EXPORT_HISTORY_DAYS: u32 = 365;

    pub const DB_FILE_NAME: &str = "price_tracker.db";
    pub const DB_MAX_CONNECTIONS: u32 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "price-tracker.log";
}
