//! Per-tick batch forming
//!
//! A batch drains candidates from one queue until its distinct-URL budget is
//! used up. URLs the redirect cache already knows are resolved on the spot
//! and never sent to the remote service.

use crate::cache::RedirectCache;
use crate::crawler::queues::{BatchSource, CandidateQueues};
use crate::model::AlignmentCandidate;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Candidates and URLs handled together in one crawl attempt
#[derive(Debug, Clone)]
pub struct CrawlBatch {
    pub id: u64,
    pub source: BatchSource,
    pub candidates: Vec<AlignmentCandidate>,
    /// Distinct URLs that need a remote lookup
    pub crawl_urls: BTreeSet<String>,
    /// URLs resolved from the redirect cache
    pub cache_hits: HashMap<String, String>,
}

impl CrawlBatch {
    pub fn new(id: u64, source: BatchSource) -> Self {
        Self {
            id,
            source,
            candidates: Vec::new(),
            crawl_urls: BTreeSet::new(),
            cache_hits: HashMap::new(),
        }
    }

    /// True when every URL was resolved from the cache
    pub fn is_cache_only(&self) -> bool {
        self.crawl_urls.is_empty()
    }

    pub fn urls_to_fetch(&self) -> Vec<String> {
        self.crawl_urls.iter().cloned().collect()
    }

    fn knows(&self, url: &str) -> bool {
        self.crawl_urls.contains(url) || self.cache_hits.contains_key(url)
    }
}

/// Forms one [`CrawlBatch`] per call from the candidate queues
pub struct BatchBuilder {
    queues: Arc<CandidateQueues>,
    cache: Arc<RedirectCache>,
    chunk_size: usize,
    next_id: AtomicU64,
}

impl BatchBuilder {
    pub fn new(queues: Arc<CandidateQueues>, cache: Arc<RedirectCache>, chunk_size: usize) -> Self {
        Self {
            queues,
            cache,
            chunk_size: chunk_size.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Drains candidates into a new batch
    ///
    /// A candidate is only taken if its new cache misses fit into the
    /// remaining URL budget, except for the first candidate of a batch which
    /// is always taken. Returns `None` if there was nothing to drain.
    pub fn build(&self) -> Option<CrawlBatch> {
        let source = self.queues.next_source()?;
        let mut batch = CrawlBatch::new(self.next_id.fetch_add(1, Ordering::Relaxed), source);

        while let Some(candidate) = self.queues.pop(source) {
            let mut misses: Vec<&String> = Vec::new();
            let mut hits: Vec<(&String, String)> = Vec::new();

            for url in candidate.original_urls() {
                if batch.knows(url)
                    || misses.contains(&url)
                    || hits.iter().any(|(hit, _)| *hit == url)
                {
                    continue;
                }
                match self.cache.lookup(url) {
                    Some(to) => hits.push((url, to)),
                    None => misses.push(url),
                }
            }

            if !batch.candidates.is_empty()
                && batch.crawl_urls.len() + misses.len() > self.chunk_size
            {
                self.queues.unpop(source, candidate);
                break;
            }

            batch.crawl_urls.extend(misses.into_iter().cloned());
            batch
                .cache_hits
                .extend(hits.into_iter().map(|(url, to)| (url.clone(), to)));
            batch.candidates.push(candidate);

            if batch.crawl_urls.len() >= self.chunk_size {
                break;
            }
        }

        if batch.candidates.is_empty() {
            return None;
        }

        debug!(
            batch = batch.id,
            source = source.as_str(),
            candidates = batch.candidates.len(),
            crawl_urls = batch.crawl_urls.len(),
            cache_hits = batch.cache_hits.len(),
            "Batch formed"
        );
        Some(batch)
    }
}
