//! Scheduled re-scraping of tracked search terms
//!
//! `AutoScraper` is an ordinary service object: the composition root builds
//! it once and drives [`AutoScraper::run`] on a background task. Each tick
//! sweeps the due terms one after another; one term failing never stops the
//! sweep or the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::collector::{PagePlan, SearchCollector};
use super::ingestion::{IngestOptions, IngestOutcome, IngestionPipeline};
use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::events::ProgressSink;
use crate::domain::product::{ProductFilter, RunStatus, ScrapeRunLog, TrackedSearchTerm};
use crate::domain::repositories::{ProductStore, TrackerStore};
use crate::infrastructure::config::{IngestionConfig, SchedulerConfig};
use crate::infrastructure::parsing::FieldSelection;

/// Due-ness rules for tracked search terms
pub struct SchedulePolicy;

impl SchedulePolicy {
    /// Never-scraped terms are due at once
    pub fn is_due(term: &TrackedSearchTerm, now: DateTime<Utc>) -> bool {
        match term.last_scraped_at {
            None => true,
            Some(last) => now >= last + term.effective_frequency(),
        }
    }

    pub fn due_terms(terms: &[TrackedSearchTerm], now: DateTime<Utc>) -> Vec<&TrackedSearchTerm> {
        terms
            .iter()
            .filter(|term| term.is_active && Self::is_due(term, now))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub due: u32,
    pub completed: u32,
    pub failed: u32,
    /// Terms whose previous run had not finished yet
    pub skipped: u32,
}

/// Removes the keyword from the running set when the run ends
struct RunClaim<'a> {
    running: &'a Mutex<HashSet<String>>,
    keyword: String,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.keyword);
    }
}

pub struct AutoScraper {
    store: Arc<dyn TrackerStore>,
    pipeline: IngestionPipeline,
    collector: SearchCollector,
    scheduler: SchedulerConfig,
    ingestion: IngestionConfig,
    running: Mutex<HashSet<String>>,
    progress: ProgressSink,
}

impl AutoScraper {
    pub fn new<S>(store: Arc<S>, collector: SearchCollector, scheduler: SchedulerConfig, ingestion: IngestionConfig) -> Self
    where
        S: TrackerStore + 'static,
    {
        let product_store: Arc<dyn ProductStore> = store.clone();
        Self {
            store,
            pipeline: IngestionPipeline::new(product_store),
            collector,
            scheduler,
            ingestion,
            running: Mutex::new(HashSet::new()),
            progress: ProgressSink::disabled(),
        }
    }

    /// Progress of scheduled runs goes here; interactive calls bring their own sink
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn is_running(&self, keyword: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(keyword)
    }

    /// Sweeps due terms every poll interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.scheduler.enabled {
            info!("Auto scraper disabled by configuration");
            return;
        }

        let mut interval = tokio::time::interval(self.scheduler.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_interval_secs = self.scheduler.poll_interval_secs, "Auto scraper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Auto scraper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_sweep(&cancel).await {
                        Ok(report) if report.due > 0 => info!(
                            due = report.due,
                            completed = report.completed,
                            failed = report.failed,
                            skipped = report.skipped,
                            "Sweep finished"
                        ),
                        Ok(_) => debug!("No terms due"),
                        Err(e) => error!("Sweep failed: {}", e),
                    }
                }
            }
        }
    }

    /// One pass over the due terms, in keyword order
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> TrackerResult<SweepReport> {
        let terms = self.store.list_terms(true).await?;
        let due = SchedulePolicy::due_terms(&terms, Utc::now());
        let mut report = SweepReport {
            due: u32::try_from(due.len()).unwrap_or(u32::MAX),
            ..SweepReport::default()
        };

        for term in due {
            if cancel.is_cancelled() {
                warn!("Sweep cancelled");
                break;
            }
            match self.run_term(term, cancel).await {
                Ok(Some(log)) if log.status == RunStatus::Completed => report.completed += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(keyword = %term.keyword, "Run bookkeeping failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Runs one term and returns its finished log, or `None` when a run for
    /// the keyword is already in progress. `Err` only when the log itself
    /// could not be written.
    pub async fn run_term(
        &self,
        term: &TrackedSearchTerm,
        cancel: &CancellationToken,
    ) -> TrackerResult<Option<ScrapeRunLog>> {
        let Some(_claim) = self.claim(&term.keyword) else {
            debug!(keyword = %term.keyword, "Run already in progress");
            return Ok(None);
        };

        let mut log = ScrapeRunLog::open(&term.keyword, Utc::now());
        self.store.save_run_log(&log).await?;
        info!(keyword = %term.keyword, run_id = %log.id, "Scheduled run started");

        match self.execute(term, cancel).await {
            Ok(items_found) => {
                log.complete(items_found, Utc::now());
                info!(keyword = %term.keyword, items_found, "Scheduled run completed");
            }
            Err(e) => {
                warn!(keyword = %term.keyword, "Scheduled run failed: {}", e);
                log.fail(e.to_string(), Utc::now());
            }
        }

        self.store.save_run_log(&log).await?;
        Ok(Some(log))
    }

    async fn execute(&self, term: &TrackedSearchTerm, cancel: &CancellationToken) -> TrackerResult<u32> {
        let tracked = self
            .store
            .query(&ProductFilter::tracked_matching(&term.keyword))
            .await?;
        let tracked_count = u32::try_from(tracked.len()).unwrap_or(u32::MAX);

        let items_found = if term.discovery_enabled {
            let scheduler = self.scheduler.clone();
            let plan = PagePlan {
                max_pages: scheduler.discovery_max_pages,
                delay: Box::new(move || scheduler.page_delay()),
            };
            let raw = self.collector.collect(&term.keyword, &plan, cancel, &self.progress).await?;
            let outcome = self
                .pipeline
                .ingest(
                    &term.keyword,
                    &raw,
                    &FieldSelection::all(),
                    IngestOptions::default(),
                    cancel,
                    &self.progress,
                )
                .await?;
            debug!(keyword = %term.keyword, tracked = tracked_count, "Discovery ingested");
            outcome.entities_saved()
        } else {
            debug!(keyword = %term.keyword, tracked = tracked_count, "Discovery disabled, counting tracked listings");
            tracked_count
        };

        self.store.mark_scraped(&term.keyword, Utc::now()).await?;
        Ok(items_found)
    }

    /// Interactive scrape of one keyword with the shorter interactive pacing.
    /// Logged like a scheduled run.
    pub async fn scrape_keyword(
        &self,
        keyword: &str,
        selection: &FieldSelection,
        options: IngestOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> TrackerResult<IngestOutcome> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(TrackerError::InvalidInput("keyword must not be empty".to_string()));
        }
        let Some(_claim) = self.claim(keyword) else {
            return Err(TrackerError::InvalidInput(format!("a run for '{}' is already in progress", keyword)));
        };

        let mut log = ScrapeRunLog::open(keyword, Utc::now());
        self.store.save_run_log(&log).await?;

        let plan = PagePlan::fixed(self.ingestion.interactive_max_pages, self.ingestion.interactive_page_delay());
        let result = async {
            let raw = self.collector.collect(keyword, &plan, cancel, progress).await?;
            self.pipeline.ingest(keyword, &raw, selection, options, cancel, progress).await
        }
        .await;

        match &result {
            Ok(outcome) => log.complete(outcome.entities_saved(), Utc::now()),
            Err(e) => log.fail(e.to_string(), Utc::now()),
        }
        self.store.save_run_log(&log).await?;
        result
    }

    fn claim(&self, keyword: &str) -> Option<RunClaim<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(keyword.to_string()) {
            return None;
        }
        Some(RunClaim {
            running: &self.running,
            keyword: keyword.to_string(),
        })
    }
}
