//! Search result page collection
//!
//! Pages are fetched one at a time with a pause in between. A failed or
//! timed-out fetch ends pagination for the keyword; whatever was collected
//! up to that point is returned.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{TrackerError, TrackerResult};
use crate::domain::events::{ProgressSink, ProgressStage};
use crate::domain::provider_item::RawProviderItem;
use crate::domain::services::{ProviderFetcher, SessionProvider};

/// How many pages to fetch and how long to pause between them
pub struct PagePlan {
    pub max_pages: u32,
    pub delay: Box<dyn Fn() -> Duration + Send + Sync>,
}

impl PagePlan {
    pub fn fixed(max_pages: u32, delay: Duration) -> Self {
        Self {
            max_pages,
            delay: Box::new(move || delay),
        }
    }
}

pub struct SearchCollector {
    fetcher: Arc<dyn ProviderFetcher>,
    sessions: Arc<dyn SessionProvider>,
    fetch_timeout: Duration,
}

impl SearchCollector {
    pub fn new(fetcher: Arc<dyn ProviderFetcher>, sessions: Arc<dyn SessionProvider>, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            sessions,
            fetch_timeout,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn ProviderFetcher> {
        &self.fetcher
    }

    pub fn sessions(&self) -> &Arc<dyn SessionProvider> {
        &self.sessions
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Only cancellation is an error; provider trouble yields a shorter list
    pub async fn collect(
        &self,
        keyword: &str,
        plan: &PagePlan,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> TrackerResult<Vec<RawProviderItem>> {
        progress.emit(ProgressStage::Session, format!("Opening session for '{}'", keyword), 0, plan.max_pages);
        let session = match self.sessions.session_for(keyword).await {
            Ok(session) => session,
            Err(e) => {
                warn!(keyword, "Session unavailable, nothing collected: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut items = Vec::new();
        for page in 1..=plan.max_pages {
            if cancel.is_cancelled() {
                return Err(TrackerError::Cancelled);
            }
            progress.emit(ProgressStage::Fetching, format!("Fetching page {}", page), page, plan.max_pages);

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
                fetched = tokio::time::timeout(
                    self.fetch_timeout,
                    self.fetcher.fetch_search_page(keyword, page, &session),
                ) => fetched,
            };

            let page_items = match fetched {
                Ok(Ok(page_items)) => page_items,
                Ok(Err(e)) => {
                    warn!(keyword, page, "Page fetch failed, stopping pagination: {}", e);
                    break;
                }
                Err(_) => {
                    warn!(keyword, page, timeout_secs = self.fetch_timeout.as_secs(), "Page fetch timed out, stopping pagination");
                    break;
                }
            };

            if page_items.is_empty() {
                if page > 1 {
                    debug!(keyword, page, "Empty page, end of results");
                    break;
                }
                debug!(keyword, "First page empty, trying the next one");
            }
            items.extend(page_items);

            if page < plan.max_pages {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
                    _ = tokio::time::sleep((plan.delay)()) => {}
                }
            }
        }

        info!(keyword, items = items.len(), "Search collection finished");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider_item::RawVariantPayload;
    use crate::domain::services::SessionContext;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedFetcher {
        pages: Mutex<Vec<TrackerResult<Vec<RawProviderItem>>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<TrackerResult<Vec<RawProviderItem>>>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderFetcher for ScriptedFetcher {
        async fn fetch_search_page(
            &self,
            _keyword: &str,
            _page_number: u32,
            _session: &SessionContext,
        ) -> TrackerResult<Vec<RawProviderItem>> {
            *self.calls.lock().expect("lock") += 1;
            self.pages.lock().expect("lock").pop().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn fetch_product_variants(
            &self,
            _base_product_id: &str,
            _session: &SessionContext,
        ) -> TrackerResult<Option<RawVariantPayload>> {
            Ok(None)
        }
    }

    struct StaticSessions;

    #[async_trait]
    impl SessionProvider for StaticSessions {
        async fn session_for(&self, _keyword: &str) -> TrackerResult<SessionContext> {
            Ok(SessionContext::default())
        }
    }

    fn items(n: usize) -> Vec<RawProviderItem> {
        (0..n)
            .map(|i| RawProviderItem {
                product_id: Some(i.to_string()),
                ..RawProviderItem::default()
            })
            .collect()
    }

    fn collector(fetcher: Arc<ScriptedFetcher>) -> SearchCollector {
        SearchCollector::new(fetcher, Arc::new(StaticSessions), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn failure_keeps_partial_results() -> TrackerResult<()> {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(items(3)),
            Err(TrackerError::provider_fetch("page 2", "503")),
            Ok(items(3)),
        ]));
        let collected = collector(Arc::clone(&fetcher))
            .collect("pla", &PagePlan::fixed(3, Duration::ZERO), &CancellationToken::new(), &ProgressSink::disabled())
            .await?;

        assert_eq!(collected.len(), 3);
        assert_eq!(*fetcher.calls.lock().expect("lock"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_later_page_ends_pagination() -> TrackerResult<()> {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(Vec::new()), Ok(items(2)), Ok(Vec::new()), Ok(items(5))]));
        let collected = collector(Arc::clone(&fetcher))
            .collect("pla", &PagePlan::fixed(4, Duration::ZERO), &CancellationToken::new(), &ProgressSink::disabled())
            .await?;

        assert_eq!(collected.len(), 2);
        assert_eq!(*fetcher.calls.lock().expect("lock"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(items(1))]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = collector(fetcher)
            .collect("pla", &PagePlan::fixed(2, Duration::ZERO), &cancel, &ProgressSink::disabled())
            .await;
        assert!(matches!(result, Err(TrackerError::Cancelled)));
    }
}
