//! Infrastructure layer: configuration, logging, persistence and parsing
//!
//! The parsing heuristics are pure; everything else touches the outside
//! world (files, environment, SQLite).

pub mod capture_provider;
pub mod config;
pub mod database_connection;
pub mod logging;
pub mod memory_store;
pub mod parsing;
pub mod sqlite_store;

pub use capture_provider::CaptureProvider;
pub use config::{AppConfig, LoggingConfig};
pub use database_connection::DatabaseConnection;
pub use logging::{init_logging, init_logging_with_config};
pub use memory_store::MemoryStore;
pub use parsing::{FieldSelection, ItemExtractor, ProductField, VariantSignalExtractor, parse_price};
pub use sqlite_store::SqliteStore;
