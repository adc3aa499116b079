//! Maps batch outcomes back to candidates
//!
//! Successful batches persist their redirects and pages, emit alignments for
//! every resolved URL and push candidates with unresolved URLs to the retry
//! queue. Failed batches are retried once and then dropped.

use crate::cache::RedirectCache;
use crate::crawler::batch::CrawlBatch;
use crate::crawler::driver::{CrawlOutcome, InFlight};
use crate::crawler::progress::ProgressReport;
use crate::crawler::queues::CandidateQueues;
use crate::model::{AlignmentCandidate, AlignmentRecord, WebPage};
use crate::remote::{summarize_html, CrawlResult, FailureKind, FetchError};
use crate::storage::SharedStorage;
use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Totals over all reconciled batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub batches: u64,
    pub failed_batches: u64,
    /// Candidates whose batch was reconciled, successful or not
    pub crawled_candidates: u64,
    pub alignments: u64,
    pub pages: u64,
    pub retried_candidates: u64,
    pub dropped_candidates: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    failed_batches: AtomicU64,
    alignments: AtomicU64,
    pages: AtomicU64,
    retried_candidates: AtomicU64,
    dropped_candidates: AtomicU64,
}

fn bump(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

/// Applies crawl outcomes to the cache, the sinks and the retry queue
pub struct Reconciler {
    queues: Arc<CandidateQueues>,
    cache: Arc<RedirectCache>,
    storage: SharedStorage,
    counters: Counters,
    progress: Mutex<ProgressReport>,
}

impl Reconciler {
    pub fn new(
        queues: Arc<CandidateQueues>,
        cache: Arc<RedirectCache>,
        storage: SharedStorage,
    ) -> Self {
        Self {
            queues,
            cache,
            storage,
            counters: Counters::default(),
            progress: Mutex::new(ProgressReport::new("candidates")),
        }
    }

    /// Consumes outcomes until every sender is gone
    ///
    /// Each processed outcome releases one unit of `in_flight`, even if
    /// handling it panicked.
    pub async fn run(
        self: Arc<Self>,
        mut outcomes: mpsc::UnboundedReceiver<CrawlOutcome>,
        in_flight: InFlight,
    ) {
        while let Some(outcome) = outcomes.recv().await {
            let batch_id = outcome.batch().id;
            let count = outcome.batch().candidates.len();

            if panic::catch_unwind(AssertUnwindSafe(|| self.handle(outcome))).is_err() {
                error!(
                    batch = batch_id,
                    candidates = count,
                    "Reconciling batch panicked, dropping candidates"
                );
                bump(&self.counters.dropped_candidates, count);
                self.queues.settle(count);
            }
            in_flight.end();
        }
        self.progress().finish();
        debug!("Reconciler stopped, no more outcomes");
    }

    pub fn handle(&self, outcome: CrawlOutcome) {
        match outcome {
            CrawlOutcome::Completed { batch, result } => self.reconcile(&batch, &result),
            CrawlOutcome::Failed { batch, error } => self.handle_failure(batch, &error),
        }
    }

    /// Resolves a batch whose URLs were all cache hits
    pub fn reconcile_cache_only(&self, batch: &CrawlBatch) {
        self.reconcile(batch, &CrawlResult::new());
    }

    /// Applies a successful fetch result to its batch
    pub fn reconcile(&self, batch: &CrawlBatch, result: &CrawlResult) {
        bump(&self.counters.batches, 1);
        self.track_progress(batch.candidates.len());

        self.cache.record_all(&result.redirect_entries());
        self.store_pages(result);

        let mut alignments = Vec::new();
        let mut retry = Vec::new();

        for candidate in &batch.candidates {
            let (resolved, unresolved) = resolve_urls(candidate, batch, result);

            for url in &resolved {
                for hashtag in distinct(candidate.hashtags()) {
                    alignments.push(AlignmentRecord {
                        hashtag: hashtag.to_string(),
                        url: url.to_string(),
                        post_id: candidate.post_id().clone(),
                    });
                }
            }

            if !unresolved.is_empty() {
                retry.push(candidate.with_urls(unresolved));
            }
        }

        self.store_alignments(&alignments);

        if !retry.is_empty() {
            if batch.source.is_retry() {
                warn!(
                    batch = batch.id,
                    candidates = retry.len(),
                    "URLs still unresolved after retry, dropping candidates"
                );
                bump(&self.counters.dropped_candidates, retry.len());
            } else {
                debug!(
                    batch = batch.id,
                    candidates = retry.len(),
                    "Unresolved URLs queued for retry"
                );
                bump(&self.counters.retried_candidates, retry.len());
                self.queues.push_retry(retry);
            }
        }
        self.queues.settle(batch.candidates.len());

        debug!(
            batch = batch.id,
            alignments = alignments.len(),
            "Batch reconciled"
        );
    }

    /// Retries or drops the candidates of a failed batch
    pub fn handle_failure(&self, batch: CrawlBatch, error: &FetchError) {
        bump(&self.counters.failed_batches, 1);
        let count = batch.candidates.len();
        self.track_progress(count);

        match error.kind() {
            FailureKind::Unexpected => {
                error!(
                    batch = batch.id,
                    source = batch.source.as_str(),
                    candidates = count,
                    "Unexpected crawl failure, dropping batch: {}",
                    error
                );
                bump(&self.counters.dropped_candidates, count);
            }
            _ if batch.source.is_retry() => {
                warn!(
                    batch = batch.id,
                    candidates = count,
                    "Retry attempt failed, dropping candidates: {}",
                    error
                );
                bump(&self.counters.dropped_candidates, count);
            }
            _ => {
                info!(
                    batch = batch.id,
                    candidates = count,
                    "Crawl attempt failed, queueing for retry: {}",
                    error
                );
                bump(&self.counters.retried_candidates, count);
                self.queues.push_retry(batch.candidates);
            }
        }
        self.queues.settle(count);
    }

    fn progress(&self) -> MutexGuard<'_, ProgressReport> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track_progress(&self, candidates: usize) {
        self.progress().add(candidates as u64);
    }

    /// One page per URL that came back with content or headers
    fn store_pages(&self, result: &CrawlResult) {
        let urls: BTreeSet<&String> = result
            .contents
            .keys()
            .chain(result.headers.keys())
            .collect();
        if urls.is_empty() {
            return;
        }

        let pages: Vec<WebPage> = urls
            .into_iter()
            .map(|url| {
                let content = result.contents.get(url);
                let summary = content.map(|c| summarize_html(c)).unwrap_or_default();
                let headers = result.headers.get(url).cloned().unwrap_or_default();
                WebPage {
                    url: url.clone(),
                    content: content.cloned(),
                    title: summary.title,
                    text: summary.text,
                    status: headers.status,
                    headers: headers.fields,
                }
            })
            .collect();

        let stored = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store_webpages(&pages);
        match stored {
            Ok(n) => bump(&self.counters.pages, n),
            Err(e) => warn!(count = pages.len(), error = %e, "Failed to store web pages"),
        }
    }

    fn store_alignments(&self, alignments: &[AlignmentRecord]) {
        if alignments.is_empty() {
            return;
        }

        let stored = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store_alignments(alignments);
        match stored {
            Ok(n) => bump(&self.counters.alignments, n),
            Err(e) => warn!(count = alignments.len(), error = %e, "Failed to store alignments"),
        }
    }

    pub fn stats(&self) -> ReconcileStats {
        let c = &self.counters;
        ReconcileStats {
            batches: c.batches.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            crawled_candidates: self.progress().count(),
            alignments: c.alignments.load(Ordering::Relaxed),
            pages: c.pages.load(Ordering::Relaxed),
            retried_candidates: c.retried_candidates.load(Ordering::Relaxed),
            dropped_candidates: c.dropped_candidates.load(Ordering::Relaxed),
        }
    }
}

/// Splits a candidate's URLs into distinct resolved targets and distinct
/// unresolved originals
///
/// Cache hits take precedence over the fetch result.
fn resolve_urls(
    candidate: &AlignmentCandidate,
    batch: &CrawlBatch,
    result: &CrawlResult,
) -> (Vec<String>, Vec<String>) {
    let mut resolved = Vec::new();
    let mut unresolved = Vec::new();

    for url in distinct(candidate.original_urls()) {
        let target = batch
            .cache_hits
            .get(url)
            .map(String::as_str)
            .or_else(|| result.resolve(url));

        match target {
            Some(to) if !resolved.iter().any(|r: &String| r == to) => resolved.push(to.to_string()),
            Some(_) => {}
            None => unresolved.push(url.to_string()),
        }
    }

    (resolved, unresolved)
}

fn distinct(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .iter()
        .map(String::as_str)
        .filter(|v| seen.insert(*v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MissPolicy;
    use crate::crawler::queues::BatchSource;
    use crate::model::{Post, PostId, RedirectEntry, UnresolvedAlignmentRecord};
    use crate::remote::ResponseHeaders;
    use crate::storage::{RunRecord, RunStatus, SqliteStorage, Storage, StorageResult};

    struct Fixture {
        reconciler: Reconciler,
        queues: Arc<CandidateQueues>,
        cache: Arc<RedirectCache>,
        storage: SharedStorage,
    }

    fn fixture() -> Fixture {
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let queues = Arc::new(CandidateQueues::new(1000));
        let cache = Arc::new(RedirectCache::new(
            Arc::clone(&storage),
            100,
            MissPolicy::FastPath,
        ));
        Fixture {
            reconciler: Reconciler::new(Arc::clone(&queues), Arc::clone(&cache), Arc::clone(&storage)),
            queues,
            cache,
            storage,
        }
    }

    fn candidate(id: u64, urls: &[&str], hashtags: &[&str]) -> AlignmentCandidate {
        AlignmentCandidate::new(
            PostId::from(id),
            urls.iter().map(|u| u.to_string()).collect(),
            hashtags.iter().map(|h| h.to_string()).collect(),
        )
    }

    fn batch(source: BatchSource, candidates: Vec<AlignmentCandidate>) -> CrawlBatch {
        let mut batch = CrawlBatch::new(1, source);
        for c in &candidates {
            batch.crawl_urls.extend(c.original_urls().iter().cloned());
        }
        batch.candidates = candidates;
        batch
    }

    fn alignments(storage: &SharedStorage, post: u64) -> Vec<(String, String)> {
        storage
            .lock()
            .unwrap()
            .alignments_for_post(&PostId::from(post))
            .unwrap()
            .into_iter()
            .map(|a| (a.hashtag, a.url))
            .collect()
    }

    fn pair(hashtag: &str, url: &str) -> (String, String) {
        (hashtag.to_string(), url.to_string())
    }

    #[test]
    fn test_single_redirect_yields_one_alignment_per_hashtag() {
        let f = fixture();
        let batch = batch(
            BatchSource::Primary,
            vec![candidate(1, &["u1"], &["h1", "h2"])],
        );
        let result = CrawlResult::new().with_redirect("u1", "v1");

        f.reconciler.reconcile(&batch, &result);

        assert_eq!(
            alignments(&f.storage, 1),
            vec![pair("h1", "v1"), pair("h2", "v1")]
        );
        assert_eq!(f.reconciler.stats().alignments, 2);
        assert!(f.queues.is_empty());
        assert_eq!(f.cache.lookup("u1").as_deref(), Some("v1"));
    }

    #[test]
    fn test_duplicates_collapse_to_distinct_alignments() {
        let f = fixture();
        let batch = batch(
            BatchSource::Primary,
            vec![candidate(1, &["u1", "u2", "u1"], &["h", "h"])],
        );
        // both short links land on the same page
        let result = CrawlResult::new()
            .with_redirect("u1", "v")
            .with_redirect("u2", "v");

        f.reconciler.reconcile(&batch, &result);

        assert_eq!(alignments(&f.storage, 1), vec![pair("h", "v")]);
    }

    #[test]
    fn test_cache_hits_take_precedence() {
        let f = fixture();
        let mut batch = batch(
            BatchSource::Primary,
            vec![candidate(1, &["u1", "u2"], &["h"])],
        );
        batch.crawl_urls.remove("u1");
        batch.cache_hits.insert("u1".to_string(), "cached".to_string());
        let result = CrawlResult::new()
            .with_redirect("u1", "fresh")
            .with_redirect("u2", "v2");

        f.reconciler.reconcile(&batch, &result);

        assert_eq!(
            alignments(&f.storage, 1),
            vec![pair("h", "cached"), pair("h", "v2")]
        );
    }

    #[test]
    fn test_partial_result_requeues_unresolved_urls() {
        let f = fixture();
        let batch = batch(
            BatchSource::Primary,
            vec![candidate(1, &["u1", "u2"], &["h"])],
        );
        let result = CrawlResult::new().with_redirect("u1", "v1");

        f.reconciler.reconcile(&batch, &result);

        assert_eq!(alignments(&f.storage, 1), vec![pair("h", "v1")]);
        assert_eq!(f.queues.retry_len(), 1);
        let retried = f.queues.pop(BatchSource::Retry).unwrap();
        assert_eq!(retried.original_urls(), &["u2".to_string()]);
        assert_eq!(retried.hashtags(), &["h".to_string()]);
        assert_eq!(f.reconciler.stats().retried_candidates, 1);
    }

    #[test]
    fn test_unresolved_on_retry_is_dropped() {
        let f = fixture();
        let batch = batch(BatchSource::Retry, vec![candidate(1, &["u1"], &["h"])]);

        f.reconciler.reconcile(&batch, &CrawlResult::new());

        assert!(f.queues.is_empty());
        assert_eq!(f.reconciler.stats().dropped_candidates, 1);
    }

    #[test]
    fn test_pages_and_redirects_are_persisted() {
        let f = fixture();
        let batch = batch(BatchSource::Primary, vec![candidate(1, &["u1"], &["h"])]);
        let result = CrawlResult::new()
            .with_redirect("u1", "v1")
            .with_page("v1", "<html><head><title>V</title></head><body>x</body></html>");

        f.reconciler.reconcile(&batch, &result);

        let storage = f.storage.lock().unwrap();
        assert_eq!(storage.count_webpages().unwrap(), 1);
        assert_eq!(storage.lookup_redirect("u1").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_header_only_urls_are_stored_as_pages() {
        let f = fixture();
        let batch = batch(BatchSource::Primary, vec![candidate(1, &["u1"], &["h"])]);
        let headers = ResponseHeaders {
            status: Some(503),
            fields: [("Retry_After".to_string(), "120".to_string())]
                .into_iter()
                .collect(),
        };
        let result = CrawlResult::new()
            .with_redirect("u1", "v1")
            .with_page("v1", "<html></html>")
            .with_headers("v2", headers);

        f.reconciler.reconcile(&batch, &result);

        assert_eq!(f.storage.lock().unwrap().count_webpages().unwrap(), 2);
        assert_eq!(f.reconciler.stats().pages, 2);
    }

    #[test]
    fn test_first_attempt_failure_requeues_all_candidates() {
        let f = fixture();
        let batch = batch(
            BatchSource::Primary,
            vec![candidate(1, &["u1"], &["h"]), candidate(2, &["u2"], &["h"])],
        );

        f.reconciler
            .handle_failure(batch, &FetchError::Network("connection reset".into()));

        assert_eq!(f.queues.retry_len(), 2);
        assert_eq!(f.reconciler.stats().retried_candidates, 2);
    }

    #[test]
    fn test_retry_failure_drops_candidates() {
        let f = fixture();
        let batch = batch(BatchSource::Retry, vec![candidate(1, &["u1"], &["h"])]);

        f.reconciler
            .handle_failure(batch, &FetchError::Deserialization("bad json".into()));

        assert!(f.queues.is_empty());
        assert_eq!(f.reconciler.stats().dropped_candidates, 1);
    }

    #[test]
    fn test_unexpected_failure_is_not_retried() {
        let f = fixture();
        let batch = batch(BatchSource::Primary, vec![candidate(1, &["u1"], &["h"])]);

        f.reconciler
            .handle_failure(batch, &FetchError::Unexpected("HTTP 403".into()));

        assert!(f.queues.is_empty());
        let stats = f.reconciler.stats();
        assert_eq!(stats.dropped_candidates, 1);
        assert_eq!(stats.failed_batches, 1);
    }

    #[tokio::test]
    async fn test_run_consumes_outcomes_and_releases_in_flight() {
        let f = fixture();
        let reconciler = Arc::new(f.reconciler);
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = InFlight::new();
        in_flight.begin();

        tx.send(CrawlOutcome::Completed {
            batch: batch(BatchSource::Primary, vec![candidate(1, &["u1"], &["h"])]),
            result: CrawlResult::new().with_redirect("u1", "v1"),
        })
        .unwrap();
        drop(tx);

        Arc::clone(&reconciler).run(rx, in_flight.clone()).await;

        assert_eq!(in_flight.count(), 0);
        assert_eq!(reconciler.stats().batches, 1);
        assert_eq!(alignments(&f.storage, 1), vec![pair("h", "v1")]);
    }

    #[test]
    fn test_settle_releases_popped_candidates_after_retry() {
        let f = fixture();
        f.queues.offer(candidate(1, &["u1"], &["h"]));
        let popped = f.queues.pop(BatchSource::Primary).unwrap();
        let batch = batch(BatchSource::Primary, vec![popped]);
        assert_eq!(f.queues.pending(), 1);

        f.reconciler
            .handle_failure(batch, &FetchError::Network("reset".into()));

        assert_eq!(f.queues.outstanding(), 0);
        assert_eq!(f.queues.retry_len(), 1);
        assert_eq!(f.queues.pending(), 1);
    }

    #[test]
    fn test_crawled_candidates_are_counted() {
        let f = fixture();
        f.reconciler.reconcile(
            &batch(
                BatchSource::Primary,
                vec![candidate(1, &["u1"], &["h"]), candidate(2, &["u2"], &["h"])],
            ),
            &CrawlResult::new().with_redirect("u1", "v1"),
        );
        f.reconciler.handle_failure(
            batch(BatchSource::Retry, vec![candidate(3, &["u3"], &["h"])]),
            &FetchError::Network("reset".into()),
        );

        assert_eq!(f.reconciler.stats().crawled_candidates, 3);
    }

    /// Storage whose page sink panics, everything else is delegated
    struct PanickingPages(SqliteStorage);

    impl Storage for PanickingPages {
        fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
            self.0.create_run(config_hash)
        }
        fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
            self.0.get_latest_run()
        }
        fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
            self.0.complete_run(run_id, status)
        }
        fn store_posts(&mut self, posts: &[Post]) -> StorageResult<usize> {
            self.0.store_posts(posts)
        }
        fn store_webpages(&mut self, _pages: &[WebPage]) -> StorageResult<usize> {
            panic!("page sink exploded")
        }
        fn store_alignments(&mut self, records: &[AlignmentRecord]) -> StorageResult<usize> {
            self.0.store_alignments(records)
        }
        fn store_unresolved_alignments(
            &mut self,
            records: &[UnresolvedAlignmentRecord],
        ) -> StorageResult<usize> {
            self.0.store_unresolved_alignments(records)
        }
        fn lookup_redirect(&self, from: &str) -> StorageResult<Option<String>> {
            self.0.lookup_redirect(from)
        }
        fn record_redirect(&mut self, from: &str, to: &str) -> StorageResult<String> {
            self.0.record_redirect(from, to)
        }
        fn record_redirects(
            &mut self,
            entries: &[RedirectEntry],
        ) -> StorageResult<Vec<RedirectEntry>> {
            self.0.record_redirects(entries)
        }
        fn alignments_for_post(&self, post_id: &PostId) -> StorageResult<Vec<AlignmentRecord>> {
            self.0.alignments_for_post(post_id)
        }
        fn count_posts(&self) -> StorageResult<u64> {
            self.0.count_posts()
        }
        fn count_redirects(&self) -> StorageResult<u64> {
            self.0.count_redirects()
        }
        fn count_webpages(&self) -> StorageResult<u64> {
            self.0.count_webpages()
        }
        fn count_alignments(&self) -> StorageResult<u64> {
            self.0.count_alignments()
        }
        fn count_unresolved_alignments(&self, spam: Option<bool>) -> StorageResult<u64> {
            self.0.count_unresolved_alignments(spam)
        }
        fn top_hashtags(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
            self.0.top_hashtags(limit)
        }
    }

    #[tokio::test]
    async fn test_panicking_outcome_still_releases_in_flight() {
        let storage: SharedStorage = Arc::new(Mutex::new(PanickingPages(
            SqliteStorage::new_in_memory().unwrap(),
        )));
        let queues = Arc::new(CandidateQueues::new(1000));
        let cache = Arc::new(RedirectCache::new(
            Arc::clone(&storage),
            100,
            MissPolicy::FastPath,
        ));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&queues), cache, storage));

        queues.offer(candidate(1, &["u1"], &["h"]));
        let popped = queues.pop(BatchSource::Primary).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = InFlight::new();
        in_flight.begin();
        tx.send(CrawlOutcome::Completed {
            batch: batch(BatchSource::Primary, vec![popped]),
            result: CrawlResult::new()
                .with_redirect("u1", "v1")
                .with_page("v1", "<html></html>"),
        })
        .unwrap();
        drop(tx);

        Arc::clone(&reconciler).run(rx, in_flight.clone()).await;

        assert_eq!(in_flight.count(), 0);
        assert_eq!(queues.pending(), 0);
        assert_eq!(reconciler.stats().dropped_candidates, 1);
    }
}
