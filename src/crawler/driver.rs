//! Asynchronous dispatch of crawl batches
//!
//! Every non-empty batch becomes one tokio task. Its outcome is sent to the
//! reconciler over a channel instead of being applied where the request
//! completed.

use crate::crawler::batch::CrawlBatch;
use crate::remote::{BatchFetcher, CrawlResult, FetchError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Completion of one dispatched batch
#[derive(Debug)]
pub enum CrawlOutcome {
    Completed {
        batch: CrawlBatch,
        result: CrawlResult,
    },
    Failed {
        batch: CrawlBatch,
        error: FetchError,
    },
}

impl CrawlOutcome {
    pub fn batch(&self) -> &CrawlBatch {
        match self {
            Self::Completed { batch, .. } | Self::Failed { batch, .. } => batch,
        }
    }
}

/// Count of batches that are being built, fetched or reconciled
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Marks work as in flight until the guard is dropped
    pub fn guard(&self) -> InFlightGuard {
        self.begin();
        InFlightGuard(self.clone())
    }
}

pub struct InFlightGuard(InFlight);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Issues batch fetches without blocking the scheduler tick
pub struct CrawlDriver {
    fetcher: Arc<dyn BatchFetcher>,
    timeout: Duration,
    outcomes: mpsc::UnboundedSender<CrawlOutcome>,
    in_flight: InFlight,
}

impl CrawlDriver {
    pub fn new(
        fetcher: Arc<dyn BatchFetcher>,
        timeout: Duration,
        outcomes: mpsc::UnboundedSender<CrawlOutcome>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            fetcher,
            timeout,
            outcomes,
            in_flight,
        }
    }

    /// Starts the remote fetch for `batch`
    ///
    /// The batch counts as in flight until the reconciler has processed its
    /// outcome. Must be called from within a tokio runtime.
    pub fn dispatch(&self, batch: CrawlBatch) -> JoinHandle<()> {
        self.in_flight.begin();

        let fetcher = Arc::clone(&self.fetcher);
        let outcomes = self.outcomes.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.timeout;

        debug!(
            batch = batch.id,
            urls = batch.crawl_urls.len(),
            "Dispatching batch"
        );

        tokio::spawn(async move {
            let urls = batch.urls_to_fetch();
            let outcome = match tokio::time::timeout(timeout, fetcher.fetch(&urls)).await {
                Ok(Ok(result)) => CrawlOutcome::Completed { batch, result },
                Ok(Err(error)) => CrawlOutcome::Failed { batch, error },
                Err(_) => CrawlOutcome::Failed {
                    batch,
                    error: FetchError::Timeout(timeout),
                },
            };

            if let Err(unsent) = outcomes.send(outcome) {
                warn!(
                    batch = unsent.0.batch().id,
                    "Reconciler is gone, batch outcome discarded"
                );
                in_flight.end();
            }
        })
    }
}
