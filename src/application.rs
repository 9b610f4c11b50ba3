//! Application layer: reconciliation, ingestion, discovery and scheduling
//!
//! Services here depend only on the domain traits; the composition root
//! hands them concrete stores and providers.

pub mod catalog;
pub mod collector;
pub mod discovery;
pub mod ingestion;
pub mod maintenance;
pub mod reconciler;
pub mod scheduler;

pub use catalog::CatalogService;
pub use collector::{PagePlan, SearchCollector};
pub use discovery::{ApiVariantStrategy, DiscoveryChain, DiscoveryResult, PageSwatchStrategy};
pub use ingestion::{IngestOptions, IngestOutcome, IngestionPipeline};
pub use maintenance::{CleanupReport, ExportDocument, MaintenanceService, RESET_CONFIRMATION, ReferencePrices};
pub use reconciler::{ReconcileDecision, ReconcileOptions, VariantReconciler, synthetic_sku_id};
pub use scheduler::{AutoScraper, SchedulePolicy, SweepReport};
