//! Replays captured provider responses from disk
//!
//! Layout under the capture root:
//!
//! ```text
//! search/<keyword-slug>/page_<n>.json   array of search result items
//! variants/<base_product_id>.json       variant endpoint payload
//! swatches/<base_product_id>.json       array of swatch images
//! ```
//!
//! A missing file is an empty answer. A file that does not parse is a
//! provider failure.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::provider_item::{RawProviderItem, RawVariantPayload, VariantImage};
use crate::domain::services::{ProviderFetcher, SessionContext, SessionProvider, VariantPageSource};

#[derive(Debug, Clone)]
pub struct CaptureProvider {
    root: PathBuf,
}

impl CaptureProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn search_page_path(&self, keyword: &str, page_number: u32) -> PathBuf {
        self.root
            .join("search")
            .join(keyword_slug(keyword))
            .join(format!("page_{}.json", page_number))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> TrackerResult<Option<T>> {
        let target = path.display().to_string();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %target, "No capture file");
                return Ok(None);
            }
            Err(e) => return Err(TrackerError::provider_fetch(target, e.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TrackerError::provider_fetch(target, format!("malformed capture: {}", e)))
    }
}

#[async_trait]
impl SessionProvider for CaptureProvider {
    async fn session_for(&self, _keyword: &str) -> TrackerResult<SessionContext> {
        Ok(SessionContext {
            cookies: Vec::new(),
            user_agent: concat!("price-tracker/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }
}

#[async_trait]
impl ProviderFetcher for CaptureProvider {
    async fn fetch_search_page(
        &self,
        keyword: &str,
        page_number: u32,
        _session: &SessionContext,
    ) -> TrackerResult<Vec<RawProviderItem>> {
        let path = self.search_page_path(keyword, page_number);
        Ok(self.read_json(&path).await?.unwrap_or_default())
    }

    async fn fetch_product_variants(
        &self,
        base_product_id: &str,
        _session: &SessionContext,
    ) -> TrackerResult<Option<RawVariantPayload>> {
        let path = self.root.join("variants").join(format!("{}.json", base_product_id));
        self.read_json(&path).await
    }
}

#[async_trait]
impl VariantPageSource for CaptureProvider {
    async fn variant_images(&self, base_product_id: &str) -> TrackerResult<Vec<VariantImage>> {
        let path = self.root.join("swatches").join(format!("{}.json", base_product_id));
        Ok(self.read_json(&path).await?.unwrap_or_default())
    }
}

/// `"PLA Filament 1.75mm"` -> `"pla-filament-1-75mm"`
fn keyword_slug(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    for c in keyword.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
