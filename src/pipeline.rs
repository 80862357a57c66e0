use crate::ebay::browse::{BrowseError, Marketplace, RawItem};
use crate::models::{NewItem, RunSummary};
use crate::normalize::normalize;
use crate::store::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_NO_ITEMS: &str = "success - no items";

/// Delay between page fetches; the marketplace rate-limits charity search.
pub const DEFAULT_PAGE_DELAY_SECS: u64 = 5;

#[derive(Debug, Error)]
enum RunError {
    #[error("{0}")]
    Market(#[from] BrowseError),
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Counters for a single run. Kept per run and passed explicitly; two runs
/// never share state.
#[derive(Debug, Default)]
struct RunCounters {
    processed: u64,
    saved: u64,
    skipped: u64,
}

pub struct IngestionPipeline {
    store: Store,
    market: Arc<dyn Marketplace>,
    page_delay: Duration,
}

impl IngestionPipeline {
    pub fn new(store: Store, market: Arc<dyn Marketplace>) -> Self {
        Self {
            store,
            market,
            page_delay: Duration::from_secs(page_delay_from_env()),
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Ingest every page of a charity's items. Never panics and never
    /// returns early with an `Err`: whatever ends the run becomes the
    /// `result` string of the summary handed back to the job executor.
    pub async fn run(&self, charity_id: i64) -> RunSummary {
        let mut counters = RunCounters::default();
        let result = match self.run_inner(charity_id, &mut counters).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    target: "charityshop.ingest",
                    charity_id,
                    error = %err,
                    "ingestion run failed"
                );
                err.to_string()
            }
        };

        info!(
            target: "charityshop.ingest",
            charity_id,
            result = %result,
            processed = counters.processed,
            saved = counters.saved,
            skipped = counters.skipped,
            "ingestion run finished"
        );
        crate::metrics::ingest_counters(
            charity_id,
            counters.processed,
            counters.saved,
            counters.skipped,
        );

        RunSummary {
            charity_id,
            result,
            processed: counters.processed,
            saved: counters.saved,
            skipped: counters.skipped,
        }
    }

    async fn run_inner(
        &self,
        charity_id: i64,
        counters: &mut RunCounters,
    ) -> Result<String, RunError> {
        let first = self.market.search_by_charity(charity_id, None).await?;
        let Some(mut items) = first.item_summaries else {
            return Ok(RESULT_NO_ITEMS.to_string());
        };
        let mut next = first.next;

        while !items.is_empty() {
            self.ingest_page(charity_id, &items, counters).await?;

            // The store holds no pooled connection here; each batch commit
            // returned its connection before this wait.
            let Some(cursor) = next.take() else { break };
            sleep(self.page_delay).await;

            let page = self.market.search_by_charity(charity_id, Some(&cursor)).await?;
            items = page.item_summaries.unwrap_or_default();
            next = page.next;
        }

        Ok(RESULT_SUCCESS.to_string())
    }

    async fn ingest_page(
        &self,
        charity_id: i64,
        items: &[RawItem],
        counters: &mut RunCounters,
    ) -> Result<(), RunError> {
        let ids: Vec<String> = items
            .iter()
            .filter_map(|item| item.item_id.clone())
            .collect();
        let existing = self.store.existing_ebay_ids(&ids).await?;

        let mut to_save: Vec<NewItem> = Vec::new();
        for raw in items {
            counters.processed += 1;
            if let Some(id) = raw.item_id.as_deref()
                && existing.contains(id)
            {
                counters.skipped += 1;
                continue;
            }
            match normalize(raw, charity_id) {
                Some(item) => to_save.push(item),
                None => counters.skipped += 1,
            }
        }

        if !to_save.is_empty() {
            counters.saved += self.store.insert_items(&to_save).await?;
        }
        Ok(())
    }
}

fn page_delay_from_env() -> u64 {
    std::env::var("PAGE_FETCH_DELAY_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PAGE_DELAY_SECS)
}
