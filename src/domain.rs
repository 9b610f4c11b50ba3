//! Domain module - entities, provider shapes and the interfaces the core depends on
//!
//! Each module is its own file in the domain/ directory; common items are
//! re-exported here for convenience.

pub mod errors;
pub mod events;
pub mod product;
pub mod provider_item;
pub mod repositories;
pub mod services;

pub use errors::{TrackerError, TrackerResult};
pub use events::{ProgressEvent, ProgressSink, ProgressStage};
pub use product::{
    PricePoint, ProductEntity, ProductFilter, RunStatus, ScrapeRunLog, StoreIdentity,
    StoredPricePoint, TrackedSearchTerm,
};
pub use provider_item::{RawProviderItem, RawVariantPayload, ScrapedRecord, VariantImage};
pub use repositories::{
    ProductBatch, ProductStore, RunLogRepository, SearchTermRepository, TrackerStore,
};
pub use services::{
    ProviderFetcher, SessionContext, SessionProvider, VariantDiscoveryStrategy, VariantPageSource,
};
