//! Collaborator interfaces the core calls into
//!
//! Fetching, session capture and page rendering live behind these traits;
//! the core never talks to the network directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::TrackerResult;
use crate::domain::provider_item::{RawProviderItem, RawVariantPayload, ScrapedRecord, VariantImage};

/// Cookies and user agent captured by a browser session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub cookies: Vec<(String, String)>,
    pub user_agent: String,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session_for(&self, keyword: &str) -> TrackerResult<SessionContext>;
}

#[async_trait]
pub trait ProviderFetcher: Send + Sync {
    /// One page of search results; an empty list means "no more items"
    async fn fetch_search_page(
        &self,
        keyword: &str,
        page_number: u32,
        session: &SessionContext,
    ) -> TrackerResult<Vec<RawProviderItem>>;

    async fn fetch_product_variants(
        &self,
        base_product_id: &str,
        session: &SessionContext,
    ) -> TrackerResult<Option<RawVariantPayload>>;
}

/// Rendered product pages, for when the variant endpoint has nothing
#[async_trait]
pub trait VariantPageSource: Send + Sync {
    async fn variant_images(&self, base_product_id: &str) -> TrackerResult<Vec<VariantImage>>;
}

/// One way of finding the purchasable variants of a known product.
///
/// Strategies are tried in order until one returns a non-empty list.
#[async_trait]
pub trait VariantDiscoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn discover_variants(&self, base_product_id: &str) -> TrackerResult<Vec<ScrapedRecord>>;
}
