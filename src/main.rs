//! price-tracker binary
//!
//! Usage:
//!
//! ```text
//! price-tracker [run]                 scheduled sweeps until Ctrl-C
//! price-tracker sweep                 one sweep over the due terms
//! price-tracker scrape <keyword>      interactive scrape, tracking the results
//! price-tracker discover <product id> variant discovery for one listing
//! price-tracker track|untrack <product id>
//! price-tracker term add|toggle|delete <keyword>
//! price-tracker terms | runs
//! price-tracker cleanup | export | reset "RESET ALL DATA"
//! ```
//!
//! Provider responses are replayed from the capture directory
//! (`ingestion.capture_dir`).

use anyhow::{Context, Result, bail};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use price_tracker_lib::application::{
    ApiVariantStrategy, AutoScraper, CatalogService, DiscoveryChain, IngestOptions, MaintenanceService,
    PageSwatchStrategy, SearchCollector,
};
use price_tracker_lib::domain::{ProgressSink, TrackerStore};
use price_tracker_lib::infrastructure::logging::log_system_info;
use price_tracker_lib::infrastructure::{
    AppConfig, CaptureProvider, FieldSelection, ItemExtractor, SqliteStore, init_logging_with_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");
    let argument = args.get(1..).map(|rest| rest.join(" ")).unwrap_or_default();

    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    let provider = Arc::new(CaptureProvider::new(config.ingestion.resolved_capture_dir()));
    info!(capture_dir = %provider.root().display(), "Replaying captured provider responses");

    let collector = SearchCollector::new(provider.clone(), provider.clone(), config.ingestion.fetch_timeout());
    let scraper = AutoScraper::new(store.clone(), collector, config.scheduler.clone(), config.ingestion.clone());
    let tracker_store: Arc<dyn TrackerStore> = store.clone();
    let catalog = CatalogService::new(tracker_store.clone());
    let maintenance = MaintenanceService::new(tracker_store, config.retention.clone());

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match (command, argument.as_str()) {
        ("run", _) => scraper.run(cancel).await,
        ("sweep", _) => {
            let report = scraper.run_sweep(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ("scrape", keyword) => {
            let (progress, handle) = progress_logger(config.ingestion.progress_buffer);
            let outcome = scraper
                .scrape_keyword(
                    keyword,
                    &FieldSelection::all(),
                    IngestOptions { track: true, ..IngestOptions::default() },
                    &cancel,
                    &progress,
                )
                .await;
            drop(progress);
            finish_progress_logger(handle).await;
            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
        ("discover", base_product_id) if !base_product_id.is_empty() => {
            let extractor = ItemExtractor::default();
            let chain = DiscoveryChain::new(config.ingestion.discovery_deadline())
                .with_strategy(ApiVariantStrategy::new(
                    provider.clone(),
                    provider.clone(),
                    extractor.clone(),
                    config.ingestion.fetch_timeout(),
                ))
                .with_strategy(PageSwatchStrategy::new(provider.clone(), extractor));
            let (progress, handle) = progress_logger(config.ingestion.progress_buffer);
            let outcome = chain
                .discover_and_ingest(scraper.pipeline(), base_product_id, IngestOptions::default(), &cancel, &progress)
                .await;
            drop(progress);
            finish_progress_logger(handle).await;
            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
        ("track", base_product_id) | ("untrack", base_product_id) if !base_product_id.is_empty() => {
            let changed = catalog.set_family_tracking(base_product_id, command == "track").await?;
            println!("{} variants updated", changed);
        }
        ("term", rest) => {
            let (action, keyword) = rest.split_once(' ').unwrap_or((rest, ""));
            let term = match action {
                "add" => catalog.add_search_term(keyword).await?,
                "toggle" => catalog.toggle_search_term(keyword).await?,
                "delete" => {
                    catalog.delete_search_term(keyword).await?;
                    println!("deleted '{}'", keyword.trim());
                    return Ok(());
                }
                other => bail!("unknown term action '{}'", other),
            };
            println!("{}", serde_json::to_string_pretty(&term)?);
        }
        ("terms", _) => println!("{}", serde_json::to_string_pretty(&catalog.search_terms().await?)?),
        ("runs", _) => println!("{}", serde_json::to_string_pretty(&catalog.recent_runs(20).await?)?),
        ("cleanup", _) => {
            let report = maintenance.cleanup(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ("export", _) => println!("{}", maintenance.export_json(Utc::now()).await?),
        ("reset", phrase) => maintenance.reset(phrase).await?,
        (other, _) => bail!("unknown command '{}'", other),
    }

    store.pool().close().await;
    Ok(())
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

/// Logs progress events on a separate task until the sink is dropped
fn progress_logger(buffer: usize) -> (ProgressSink, tokio::task::JoinHandle<()>) {
    let (sink, events) = ProgressSink::channel(buffer);
    let handle = tokio::spawn(async move {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            info!(stage = ?event.stage, step = event.step, total = event.total, "{}", event.message);
        }
    });
    (sink, handle)
}

async fn finish_progress_logger(handle: tokio::task::JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!("Progress logger task ended abnormally: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use price_tracker_lib::domain::ProgressStage;

    #[tokio::test]
    async fn progress_logger_drains_until_the_sink_is_dropped() {
        let (progress, handle) = progress_logger(4);
        progress.emit(ProgressStage::Fetching, "page 1", 1, 2);
        drop(progress);
        finish_progress_logger(handle).await;
    }

    #[tokio::test]
    async fn failed_logger_task_is_reported_not_propagated() {
        let handle: tokio::task::JoinHandle<()> = tokio::spawn(async {
            panic!("logger failure");
        });
        finish_progress_logger(handle).await;
    }
}
