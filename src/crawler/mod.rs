//! Crawl pipeline
//!
//! This module contains the alignment pipeline, including:
//! - Bounded candidate queues with producer backpressure
//! - Post ingestion and spam filtering
//! - Per-tick batch forming against the redirect cache
//! - Asynchronous batch dispatch and outcome reconciliation
//! - Overall run coordination

mod batch;
mod coordinator;
mod driver;
mod producer;
mod progress;
mod queues;
mod reconciler;

pub use batch::{BatchBuilder, CrawlBatch};
pub use coordinator::{run_crawl, AlignmentTask, Coordinator, CrawlSummary};
pub use driver::{CrawlDriver, CrawlOutcome, InFlight, InFlightGuard};
pub use producer::{Producer, ProducerStats, SpamFilter};
pub use progress::{ProgressReport, DEFAULT_REPORT_DELAY};
pub use queues::{BatchSource, CandidateQueues};
pub use reconciler::{ReconcileStats, Reconciler};
