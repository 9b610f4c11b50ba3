//! User-facing catalog operations: tracking, variant listing and search terms

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::product::{ProductEntity, ProductFilter, ScrapeRunLog, TrackedSearchTerm};
use crate::domain::repositories::TrackerStore;

pub struct CatalogService {
    store: Arc<dyn TrackerStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self { store }
    }

    /// Turns tracking on or off for every variant of a listing. Returns the
    /// number of variants changed.
    pub async fn set_family_tracking(&self, base_product_id: &str, tracked: bool) -> TrackerResult<usize> {
        let mut family = self.store.query(&ProductFilter::family(base_product_id)).await?;
        if family.is_empty() {
            return Err(TrackerError::not_found("product", base_product_id));
        }

        let now = Utc::now();
        family.retain_mut(|entity| {
            if entity.is_tracked == tracked {
                return false;
            }
            if tracked {
                entity.start_tracking(now);
            } else {
                entity.stop_tracking();
            }
            true
        });

        self.store.save_tracking(&family).await?;
        info!(base_product_id, tracked, changed = family.len(), "Family tracking updated");
        Ok(family.len())
    }

    /// Active variants sharing the base product id, ordered by label
    pub async fn variants_of(&self, base_product_id: &str) -> TrackerResult<Vec<ProductEntity>> {
        let filter = ProductFilter {
            active_only: true,
            ..ProductFilter::family(base_product_id)
        };
        let mut variants = self.store.query(&filter).await?;
        variants.sort_by(|a, b| a.variant_label.cmp(&b.variant_label).then_with(|| a.sku_id.cmp(&b.sku_id)));
        Ok(variants)
    }

    pub async fn related_by_spu(&self, spu_id: &str) -> TrackerResult<Vec<ProductEntity>> {
        self.store
            .query(&ProductFilter {
                spu_id: Some(spu_id.to_string()),
                active_only: true,
                ..ProductFilter::default()
            })
            .await
    }

    pub async fn add_search_term(&self, keyword: &str) -> TrackerResult<TrackedSearchTerm> {
        let keyword = normalize_keyword(keyword)?;
        if self.store.find_term(&keyword).await?.is_some() {
            return Err(TrackerError::InvalidInput(format!("search term '{}' already exists", keyword)));
        }
        let term = TrackedSearchTerm::new(keyword, Utc::now());
        self.store.save_term(&term).await?;
        info!(keyword = %term.keyword, "Search term added");
        Ok(term)
    }

    /// Flips the active flag and returns the updated term
    pub async fn toggle_search_term(&self, keyword: &str) -> TrackerResult<TrackedSearchTerm> {
        let keyword = normalize_keyword(keyword)?;
        let mut term = self
            .store
            .find_term(&keyword)
            .await?
            .ok_or_else(|| TrackerError::not_found("search term", keyword.as_str()))?;
        term.is_active = !term.is_active;
        self.store.save_term(&term).await?;
        info!(keyword = %term.keyword, active = term.is_active, "Search term toggled");
        Ok(term)
    }

    pub async fn delete_search_term(&self, keyword: &str) -> TrackerResult<()> {
        let keyword = normalize_keyword(keyword)?;
        if !self.store.delete_term(&keyword).await? {
            return Err(TrackerError::not_found("search term", keyword));
        }
        info!(keyword = %keyword, "Search term deleted");
        Ok(())
    }

    pub async fn search_terms(&self) -> TrackerResult<Vec<TrackedSearchTerm>> {
        self.store.list_terms(false).await
    }

    /// Newest first
    pub async fn recent_runs(&self, limit: u32) -> TrackerResult<Vec<ScrapeRunLog>> {
        self.store.recent_run_logs(limit).await
    }
}

fn normalize_keyword(keyword: &str) -> TrackerResult<String> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::InvalidInput("keyword must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}
