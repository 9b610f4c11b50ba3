//! Housekeeping: retention cleanup, reset, price repair and export
//!
//! Repair is the only code path allowed to rewrite stored price points.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::product::ProductFilter;
use crate::domain::repositories::TrackerStore;
use crate::infrastructure::config::RetentionConfig;
use crate::infrastructure::parsing::parse_price;

/// Phrase a caller must pass verbatim to [`MaintenanceService::reset`]
pub const RESET_CONFIRMATION: &str = "RESET ALL DATA";

/// Stored prices further than this from the reference are rewritten
const REPAIR_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub price_points_deleted: u64,
    pub products_deactivated: u64,
    pub run_logs_deleted: u64,
}

/// Known-good price strings for one base product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencePrices {
    pub sale_price: Option<String>,
    pub original_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: DateTime<Utc>,
    pub total_products: usize,
    pub products: Vec<ExportedProduct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedProduct {
    pub product_id: String,
    pub sku_id: String,
    pub title: String,
    pub variant_label: Option<String>,
    pub store_name: Option<String>,
    pub currency: Option<String>,
    pub listing_url: String,
    pub tracked_since: Option<DateTime<Utc>>,
    pub price_history: Vec<ExportedPrice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedPrice {
    pub sale_price: Option<f64>,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

pub struct MaintenanceService {
    store: Arc<dyn TrackerStore>,
    retention: RetentionConfig,
}

impl MaintenanceService {
    pub fn new(store: Arc<dyn TrackerStore>, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    /// Applies the three retention horizons relative to `now`
    pub async fn cleanup(&self, now: DateTime<Utc>) -> TrackerResult<CleanupReport> {
        let history_cutoff = now - Duration::days(i64::from(self.retention.price_history_days));
        let inactive_cutoff = now - Duration::days(i64::from(self.retention.inactive_product_days));
        let log_cutoff = now - Duration::days(i64::from(self.retention.run_log_days));

        let report = CleanupReport {
            price_points_deleted: self.store.delete_price_points_before(history_cutoff).await?,
            products_deactivated: self.store.deactivate_stale_untracked(inactive_cutoff).await?,
            run_logs_deleted: self.store.delete_run_logs_before(log_cutoff).await?,
        };
        info!(
            price_points = report.price_points_deleted,
            products = report.products_deactivated,
            run_logs = report.run_logs_deleted,
            "Retention cleanup finished"
        );
        Ok(report)
    }

    pub async fn reset(&self, confirmation: &str) -> TrackerResult<()> {
        if confirmation != RESET_CONFIRMATION {
            return Err(TrackerError::InvalidInput(format!(
                "invalid confirmation phrase, type exactly: {}",
                RESET_CONFIRMATION
            )));
        }
        self.store.reset_all().await?;
        warn!("All tracker data deleted");
        Ok(())
    }

    /// Re-parses reference prices per base product id and rewrites stored
    /// points whose sale price is off by more than the repair threshold.
    /// Returns the number of points rewritten.
    pub async fn repair_prices(&self, references: &HashMap<String, ReferencePrices>) -> TrackerResult<u32> {
        let mut repaired = 0;
        for (base_product_id, reference) in references {
            let Some(correct_sale) = reference.sale_price.as_deref().and_then(parse_price) else {
                continue;
            };
            let correct_original = reference.original_price.as_deref().and_then(parse_price);

            for entity in self.store.query(&ProductFilter::family(base_product_id)).await? {
                for stored in self.store.price_history(&entity.sku_id, None).await? {
                    let Some(sale) = stored.point.sale_price else {
                        continue;
                    };
                    if (sale - correct_sale).abs() <= REPAIR_THRESHOLD {
                        continue;
                    }
                    info!(sku_id = %entity.sku_id, point_id = stored.id, from = sale, to = correct_sale, "Repairing price point");
                    self.store
                        .rewrite_price_point(
                            stored.id,
                            Some(correct_sale),
                            correct_original.or(stored.point.original_price),
                        )
                        .await?;
                    repaired += 1;
                }
            }
        }
        info!(repaired, "Price repair finished");
        Ok(repaired)
    }

    /// Tracked, active listings with their history inside the export window
    pub async fn export(&self, now: DateTime<Utc>) -> TrackerResult<ExportDocument> {
        let since = now - Duration::days(i64::from(self.retention.export_history_days));
        let tracked = self
            .store
            .query(&ProductFilter {
                tracked_only: true,
                active_only: true,
                ..ProductFilter::default()
            })
            .await?;

        let mut products = Vec::with_capacity(tracked.len());
        for entity in tracked {
            let price_history = self
                .store
                .price_history(&entity.sku_id, Some(since))
                .await?
                .into_iter()
                .map(|stored| ExportedPrice {
                    sale_price: stored.point.sale_price,
                    original_price: stored.point.original_price,
                    discount_percent: stored.point.discount_percent,
                    observed_at: stored.point.observed_at,
                })
                .collect();
            products.push(ExportedProduct {
                product_id: entity.base_product_id,
                sku_id: entity.sku_id,
                title: entity.title,
                variant_label: entity.variant_label,
                store_name: entity.store.name,
                currency: entity.currency,
                listing_url: entity.listing_url,
                tracked_since: entity.tracked_since,
                price_history,
            });
        }

        Ok(ExportDocument {
            export_date: now,
            total_products: products.len(),
            products,
        })
    }

    pub async fn export_json(&self, now: DateTime<Utc>) -> TrackerResult<String> {
        let document = self.export(now).await?;
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
