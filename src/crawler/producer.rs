//! Ingestion side of the crawl pipeline
//!
//! The producer turns posts into audit records and alignment candidates. It
//! runs on a blocking thread and is throttled by the candidate queues.

use crate::config::SpamConfig;
use crate::crawler::progress::ProgressReport;
use crate::crawler::queues::CandidateQueues;
use crate::model::{AlignmentCandidate, Post, UnresolvedAlignmentRecord};
use crate::source::open_dump;
use crate::storage::SharedStorage;
use crate::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

/// Case-insensitive hashtag blocklist
#[derive(Debug, Clone, Default)]
pub struct SpamFilter {
    blocklist: HashSet<String>,
}

impl SpamFilter {
    pub fn new<I, S>(hashtags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocklist: hashtags
                .into_iter()
                .map(|h| h.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &SpamConfig) -> Self {
        Self::new(&config.hashtags)
    }

    /// Whether any hashtag of the post is blocklisted
    pub fn is_spam(&self, post: &Post) -> bool {
        post.hashtags
            .iter()
            .flatten()
            .any(|h| self.blocklist.contains(&h.to_lowercase()))
    }
}

/// Ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub posts: u64,
    pub spam_posts: u64,
    pub candidates: u64,
    pub unresolved_records: u64,
    pub files: u64,
}

/// Feeds posts into the sinks and the candidate queues
pub struct Producer {
    queues: Arc<CandidateQueues>,
    storage: SharedStorage,
    spam: SpamFilter,
    post_buffer: Vec<Post>,
    flush_size: usize,
    progress: ProgressReport,
    stats: ProducerStats,
}

impl Producer {
    pub fn new(
        queues: Arc<CandidateQueues>,
        storage: SharedStorage,
        spam: SpamFilter,
        flush_size: usize,
    ) -> Self {
        Self {
            queues,
            storage,
            spam,
            post_buffer: Vec::with_capacity(flush_size),
            flush_size: flush_size.max(1),
            progress: ProgressReport::new("posts"),
            stats: ProducerStats::default(),
        }
    }

    /// Ingests one post
    ///
    /// Audit records are written before the candidate is offered, so they
    /// never wait on backpressure. Returns `false` once the queues are closed.
    pub fn ingest(&mut self, post: Post) -> bool {
        self.stats.posts += 1;
        self.progress.add(1);

        let spam = self.spam.is_spam(&post);
        self.store_unresolved(&post, spam);
        let candidate = if spam {
            None
        } else {
            AlignmentCandidate::from_post(&post)
        };

        self.post_buffer.push(post);
        if self.post_buffer.len() >= self.flush_size {
            self.flush_posts();
        }

        if spam {
            self.stats.spam_posts += 1;
            return true;
        }

        match candidate {
            Some(candidate) => {
                self.stats.candidates += 1;
                self.queues.offer(candidate)
            }
            None => true,
        }
    }

    /// Ingests every post of a dump file
    ///
    /// Returns `false` if ingestion stopped early because the queues closed.
    pub fn ingest_file(&mut self, path: &Path) -> Result<bool> {
        info!("Ingesting {}", path.display());
        let reader = open_dump(path)?;
        self.stats.files += 1;

        let mut open = true;
        for post in reader {
            if !self.ingest(post) {
                open = false;
                break;
            }
        }

        self.flush_posts();
        Ok(open)
    }

    /// Ingests all files in order, skipping files that cannot be opened
    pub fn ingest_files(&mut self, paths: &[impl AsRef<Path>]) {
        for path in paths {
            match self.ingest_file(path.as_ref()) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Candidate queues closed, ingestion stopped");
                    break;
                }
                Err(e) => warn!("Skipping {}: {}", path.as_ref().display(), e),
            }
        }
        self.flush_posts();
        self.progress.finish();
    }

    /// Stores buffered posts
    pub fn flush_posts(&mut self) {
        if self.post_buffer.is_empty() {
            return;
        }

        let result = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store_posts(&self.post_buffer);
        match result {
            Ok(stored) => debug!(buffered = self.post_buffer.len(), stored, "Posts flushed"),
            Err(e) => warn!(count = self.post_buffer.len(), error = %e, "Failed to store posts"),
        }
        self.post_buffer.clear();
    }

    fn store_unresolved(&mut self, post: &Post, spam: bool) {
        let urls = post.distinct_urls();
        let records: Vec<UnresolvedAlignmentRecord> = post
            .distinct_hashtags()
            .into_iter()
            .flat_map(|hashtag| {
                urls.iter().map(move |url| UnresolvedAlignmentRecord {
                    hashtag: hashtag.to_string(),
                    url: url.to_string(),
                    post_id: post.id.clone(),
                    spam,
                })
            })
            .collect();

        if records.is_empty() {
            return;
        }

        let result = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store_unresolved_alignments(&records);
        match result {
            Ok(stored) => self.stats.unresolved_records += stored as u64,
            Err(e) => warn!(post = %post.id, error = %e, "Failed to store unresolved alignments"),
        }
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }
}
