use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One purchasable listing variant.
///
/// `sku_id` is the primary dedup key; several entities may share
/// `base_product_id` (variants of one listing) or `spu_id` (marketplace
/// confirmed variant group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEntity {
    pub base_product_id: String,
    pub sku_id: String,
    pub spu_id: Option<String>,
    pub title: String,
    pub variant_label: Option<String>,
    pub image_url: Option<String>,
    pub listing_url: String,
    pub store: StoreIdentity,
    pub currency: Option<String>,
    pub rating: Option<f64>,
    pub order_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_tracked: bool,
    pub tracked_since: Option<DateTime<Utc>>,
}

/// Seller information attached to a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreIdentity {
    pub name: Option<String>,
    pub id: Option<String>,
    pub url: Option<String>,
}

impl ProductEntity {
    /// Opt this variant into price history collection.
    pub fn start_tracking(&mut self, now: DateTime<Utc>) {
        if !self.is_tracked {
            self.is_tracked = true;
            self.tracked_since = Some(now);
        }
    }

    pub fn stop_tracking(&mut self) {
        self.is_tracked = false;
        self.tracked_since = None;
    }

    /// Title with the variant label removed, used when grouping listings
    pub fn base_title(&self) -> String {
        match &self.variant_label {
            Some(label) if !label.is_empty() => self.title.replace(label.as_str(), "").trim().to_string(),
            _ => self.title.clone(),
        }
    }
}

/// One timestamped price observation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub sku_id: String,
    pub sale_price: Option<f64>,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// A stored price point together with its row identity.
///
/// Only the offline repair path needs the id; everything else treats
/// history as an ordered list of [`PricePoint`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPricePoint {
    pub id: i64,
    pub point: PricePoint,
}

/// A user-registered keyword driving scheduled scraping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSearchTerm {
    pub keyword: String,
    pub is_active: bool,
    pub discovery_enabled: bool,
    pub scrape_frequency_hours: u32,
    pub tracked_update_frequency_hours: Option<u32>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackedSearchTerm {
    pub const DEFAULT_SCRAPE_FREQUENCY_HOURS: u32 = 24;
    pub const DEFAULT_TRACKED_UPDATE_FREQUENCY_HOURS: u32 = 6;

    pub fn new(keyword: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            keyword: keyword.into(),
            is_active: true,
            discovery_enabled: true,
            scrape_frequency_hours: Self::DEFAULT_SCRAPE_FREQUENCY_HOURS,
            tracked_update_frequency_hours: Some(Self::DEFAULT_TRACKED_UPDATE_FREQUENCY_HOURS),
            last_scraped_at: None,
            created_at: now,
        }
    }

    /// Tracked-update frequency when set (and non-zero), else the discovery frequency
    pub fn effective_frequency(&self) -> Duration {
        let hours = self
            .tracked_update_frequency_hours
            .filter(|h| *h > 0)
            .unwrap_or(self.scrape_frequency_hours);
        Duration::hours(i64::from(hours))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit record of one scheduled or manual ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRunLog {
    pub id: String,
    pub keyword: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub items_found: u32,
    pub error_message: Option<String>,
}

impl ScrapeRunLog {
    pub fn open(keyword: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            keyword: keyword.into(),
            started_at: now,
            finished_at: None,
            status: RunStatus::Running,
            items_found: 0,
            error_message: None,
        }
    }

    pub fn complete(&mut self, items_found: u32, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.items_found = items_found;
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(now);
    }
}

/// Filter criteria for entity queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    /// Case-insensitive substring of the title
    pub title_contains: Option<String>,
    pub base_product_id: Option<String>,
    pub spu_id: Option<String>,
    pub tracked_only: bool,
    pub active_only: bool,
}

impl ProductFilter {
    pub fn tracked_matching(keyword: &str) -> Self {
        Self {
            title_contains: Some(keyword.to_string()),
            tracked_only: true,
            active_only: true,
            ..Self::default()
        }
    }

    pub fn family(base_product_id: &str) -> Self {
        Self {
            base_product_id: Some(base_product_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &ProductEntity) -> bool {
        if self.tracked_only && !entity.is_tracked {
            return false;
        }
        if self.active_only && !entity.is_active {
            return false;
        }
        if let Some(base) = &self.base_product_id {
            if &entity.base_product_id != base {
                return false;
            }
        }
        if let Some(spu) = &self.spu_id {
            if entity.spu_id.as_ref() != Some(spu) {
                return false;
            }
        }
        if let Some(needle) = &self.title_contains {
            if !entity.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}
