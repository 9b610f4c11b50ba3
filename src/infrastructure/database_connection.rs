// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::infrastructure::config::DatabaseConfig;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_max_connections(&config.url, config.max_connections).await
    }

    async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            // Create database file directory if it doesn't exist
            let db_path = database_url
                .strip_prefix("sqlite://")
                .or_else(|| database_url.strip_prefix("sqlite:"))
                .unwrap_or(database_url);
            if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is its own database
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            pool_options = pool_options.max_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r#"
            CREATE TABLE IF NOT EXISTS products (
                sku_id TEXT PRIMARY KEY,
                base_product_id TEXT NOT NULL,
                spu_id TEXT,
                title TEXT NOT NULL,
                variant_label TEXT,
                image_url TEXT,
                listing_url TEXT NOT NULL,
                store_name TEXT,
                store_id TEXT,
                store_url TEXT,
                currency TEXT,
                rating REAL,
                order_count INTEGER,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_tracked BOOLEAN NOT NULL DEFAULT 0,
                tracked_since DATETIME
            )
        "#;

        let create_price_points_sql = r#"
            CREATE TABLE IF NOT EXISTS price_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sku_id TEXT NOT NULL,
                sale_price REAL,
                original_price REAL,
                discount_percent REAL,
                observed_at DATETIME NOT NULL,
                FOREIGN KEY (sku_id) REFERENCES products (sku_id) ON DELETE CASCADE
            )
        "#;

        let create_search_terms_sql = r#"
            CREATE TABLE IF NOT EXISTS search_terms (
                keyword TEXT PRIMARY KEY,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                discovery_enabled BOOLEAN NOT NULL DEFAULT 1,
                scrape_frequency_hours INTEGER NOT NULL DEFAULT 24,
                tracked_update_frequency_hours INTEGER,
                last_scraped_at DATETIME,
                created_at DATETIME NOT NULL
            )
        "#;

        let create_run_logs_sql = r#"
            CREATE TABLE IF NOT EXISTS scrape_run_logs (
                id TEXT PRIMARY KEY,
                keyword TEXT NOT NULL,
                started_at DATETIME NOT NULL,
                finished_at DATETIME,
                status TEXT NOT NULL DEFAULT 'running',
                items_found INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_products_base_product_id ON products (base_product_id);
            CREATE INDEX IF NOT EXISTS idx_products_spu_id ON products (spu_id);
            CREATE INDEX IF NOT EXISTS idx_price_points_sku_observed ON price_points (sku_id, observed_at);
            CREATE INDEX IF NOT EXISTS idx_run_logs_started_at ON scrape_run_logs (started_at);
        "#;

        for sql in [
            create_products_sql,
            create_price_points_sql,
            create_search_terms_sql,
            create_run_logs_sql,
        ] {
            sqlx::query(sql).execute(&self.pool).await.context("Failed to create table")?;
        }
        sqlx::raw_sql(create_indexes_sql)
            .execute(&self.pool)
            .await
            .context("Failed to create indexes")?;

        Ok(())
    }
}
