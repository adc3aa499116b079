//! Crawler coordinator - wires the crawl pipeline together
//!
//! A run consists of:
//! - A producer ingesting dump files on a blocking thread
//! - An [`AlignmentTask`] forming one batch per scheduler tick
//! - Crawl tasks resolving batches against the remote service
//! - A reconciler applying outcomes, the only writer of alignments
//!
//! Once ingestion ends the coordinator waits, bounded by the shutdown grace
//! period, for the queues to drain and in-flight batches to settle.

use crate::cache::RedirectCache;
use crate::config::Config;
use crate::crawler::batch::BatchBuilder;
use crate::crawler::driver::{CrawlDriver, InFlight};
use crate::crawler::producer::{Producer, ProducerStats, SpamFilter};
use crate::crawler::queues::CandidateQueues;
use crate::crawler::reconciler::{ReconcileStats, Reconciler};
use crate::remote::{BatchFetcher, QueryApiFetcher};
use crate::scheduler::{RateLimitedScheduler, RateLimitedTask};
use crate::source::scan_input_files;
use crate::storage::{open_storage, RunStatus, SharedStorage};
use crate::{CrawlerError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The per-tick unit of work: form one batch and hand it off
pub struct AlignmentTask {
    builder: BatchBuilder,
    queues: Arc<CandidateQueues>,
    driver: CrawlDriver,
    reconciler: Arc<Reconciler>,
    in_flight: InFlight,
}

impl AlignmentTask {
    pub fn new(
        builder: BatchBuilder,
        queues: Arc<CandidateQueues>,
        driver: CrawlDriver,
        reconciler: Arc<Reconciler>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            builder,
            queues,
            driver,
            reconciler,
            in_flight,
        }
    }
}

impl RateLimitedTask for AlignmentTask {
    fn run(&mut self) -> Result<()> {
        // Candidates popped by the builder are in flight until handed off
        let _building = self.in_flight.guard();

        let batch = match self.builder.build() {
            Some(batch) => batch,
            None => return Ok(()),
        };

        if batch.is_cache_only() {
            tracing::debug!(batch = batch.id, "Batch fully resolved from cache");
            self.reconciler.reconcile_cache_only(&batch);
        } else {
            self.driver.dispatch(batch);
        }
        Ok(())
    }

    fn repeat(&self) -> bool {
        !self.queues.is_closed()
    }

    fn name(&self) -> &str {
        "alignment"
    }
}

/// Totals of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub run_id: i64,
    pub producer: ProducerStats,
    pub reconciler: ReconcileStats,
    /// Candidates still queued when the run ended
    pub abandoned_candidates: usize,
    /// Whether all work drained within the grace period
    pub drained: bool,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    fetcher: Arc<dyn BatchFetcher>,
    run_id: i64,
}

impl Coordinator {
    /// Creates a coordinator and registers a new run
    pub fn new(
        config: Config,
        storage: SharedStorage,
        fetcher: Arc<dyn BatchFetcher>,
        config_hash: &str,
    ) -> Result<Self> {
        let run_id = storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .create_run(config_hash)?;
        tracing::info!("Created crawl run {}", run_id);

        Ok(Self {
            config: Arc::new(config),
            storage,
            fetcher,
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Ingests `files` and resolves every candidate they produce
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run(self, files: Vec<PathBuf>) -> Result<CrawlSummary> {
        tracing::info!(
            run = self.run_id,
            files = files.len(),
            "Starting crawl run"
        );
        let start_time = Instant::now();
        let crawler = &self.config.crawler;

        let queues = Arc::new(CandidateQueues::new(crawler.backpressure_threshold()));
        let cache = Arc::new(RedirectCache::from_config(
            &self.config.cache,
            Arc::clone(&self.storage),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&queues),
            Arc::clone(&cache),
            Arc::clone(&self.storage),
        ));
        let in_flight = InFlight::new();

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let reconciler_handle =
            tokio::spawn(Arc::clone(&reconciler).run(outcome_rx, in_flight.clone()));

        let scheduler = RateLimitedScheduler::start(&self.config.scheduler);
        scheduler.schedule(Box::new(AlignmentTask::new(
            BatchBuilder::new(Arc::clone(&queues), Arc::clone(&cache), crawler.chunk_size),
            Arc::clone(&queues),
            CrawlDriver::new(
                Arc::clone(&self.fetcher),
                crawler.request_timeout(),
                outcome_tx,
                in_flight.clone(),
            ),
            Arc::clone(&reconciler),
            in_flight.clone(),
        )));

        let mut producer = Producer::new(
            Arc::clone(&queues),
            Arc::clone(&self.storage),
            SpamFilter::from_config(&self.config.spam),
            crawler.post_flush_size,
        );
        let ingested = tokio::task::spawn_blocking(move || {
            producer.ingest_files(&files);
            producer.stats()
        })
        .await;

        let producer_stats = match ingested {
            Ok(stats) => stats,
            Err(e) => {
                scheduler.close();
                queues.close();
                reconciler_handle.abort();
                self.finish_run(RunStatus::Failed)?;
                return Err(CrawlerError::Task(format!("Producer failed: {}", e)));
            }
        };
        tracing::info!(
            posts = producer_stats.posts,
            candidates = producer_stats.candidates,
            spam = producer_stats.spam_posts,
            "Ingestion finished, waiting for queued candidates"
        );

        let mut drained = wait_for_drain(&queues, &in_flight, crawler.shutdown_grace()).await;

        scheduler.close();
        scheduler.join().await;
        // Releases the task and with it the last outcome sender
        drop(scheduler);

        if drained {
            if let Err(e) = reconciler_handle.await {
                tracing::error!("Reconciler task failed: {}", e);
            }
        } else {
            reconciler_handle.abort();
        }
        queues.close();

        // Candidates still queued or popped without being settled were lost
        let abandoned_candidates = queues.pending();
        drained = drained && abandoned_candidates == 0;

        let status = if drained {
            RunStatus::Completed
        } else {
            RunStatus::Interrupted
        };
        self.finish_run(status)?;

        let summary = CrawlSummary {
            run_id: self.run_id,
            producer: producer_stats,
            reconciler: reconciler.stats(),
            abandoned_candidates,
            drained,
        };
        let (hits, misses) = cache.hit_stats();

        tracing::info!(
            run = summary.run_id,
            batches = summary.reconciler.batches,
            candidates = summary.reconciler.crawled_candidates,
            alignments = summary.reconciler.alignments,
            pages = summary.reconciler.pages,
            dropped = summary.reconciler.dropped_candidates,
            abandoned = summary.abandoned_candidates,
            cache_hits = hits,
            cache_misses = misses,
            "Crawl finished in {:?}",
            start_time.elapsed()
        );

        Ok(summary)
    }

    fn finish_run(&self, status: RunStatus) -> Result<()> {
        self.storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .complete_run(self.run_id, status)?;
        Ok(())
    }
}

/// Polls until no candidate is queued or in flight
///
/// A candidate counts as pending from the moment it is queued until the
/// reconciler settles its batch, including any trip through the retry queue.
/// Returns `false` if `grace` ran out first.
async fn wait_for_drain(queues: &CandidateQueues, in_flight: &InFlight, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if queues.pending() == 0 && in_flight.count() == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                pending = queues.pending(),
                in_flight = in_flight.count(),
                "Shutdown grace period expired with work pending"
            );
            return false;
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

/// Runs a complete crawl operation
///
/// Opens the database, scans the input directory (or `input_override`) for
/// dump files and resolves them against the configured query endpoint.
///
/// # Example
///
/// ```no_run
/// # use hashtag_crawler::{Config, crawler::run_crawl};
/// # async fn example(config: Config) -> Result<(), Box<dyn std::error::Error>> {
/// let summary = run_crawl(config, "config-hash", None).await?;
/// println!("{} alignments", summary.reconciler.alignments);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    input_override: Option<&Path>,
) -> Result<CrawlSummary> {
    let input_dir = input_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.input.directory));
    let files = scan_input_files(&input_dir, &config.input.file_pattern)?;
    if files.is_empty() {
        tracing::warn!("No dump files found in {}", input_dir.display());
    }

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let fetcher: Arc<dyn BatchFetcher> = Arc::new(QueryApiFetcher::new(
        &config.remote,
        config.crawler.request_timeout(),
    )?);

    let coordinator = Coordinator::new(config, storage, fetcher, config_hash)?;
    coordinator.run(files).await
}
