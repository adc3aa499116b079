//! Output module for reporting on crawl results
//!
//! This module handles:
//! - Loading alignment statistics from the database
//! - Summarizing the latest crawl run

pub mod stats;

pub use stats::{load_statistics, print_statistics, AlignmentStatistics};

use crate::storage::{RunStatus, Storage};
use crate::{CrawlerError, Result};

/// The latest run together with the database statistics
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<u64>,
    pub status: RunStatus,
    pub config_hash: String,
    pub statistics: AlignmentStatistics,
}

/// Builds a report on the latest run
pub fn generate_report(storage: &dyn Storage) -> Result<RunReport> {
    let run = storage
        .get_latest_run()?
        .ok_or_else(|| CrawlerError::Task("No crawl runs found in database".to_string()))?;

    let duration_seconds = match (
        run.started_at.parse::<chrono::DateTime<chrono::Utc>>(),
        run.finished_at
            .as_deref()
            .map(str::parse::<chrono::DateTime<chrono::Utc>>),
    ) {
        (Ok(started), Some(Ok(finished))) => Some((finished - started).num_seconds().max(0) as u64),
        _ => None,
    };

    Ok(RunReport {
        run_id: run.id,
        started_at: run.started_at,
        finished_at: run.finished_at,
        duration_seconds,
        status: run.status,
        config_hash: run.config_hash,
        statistics: load_statistics(storage)?,
    })
}

/// Prints a run report to stdout
pub fn print_report(report: &RunReport) {
    println!("=== Run {} ===\n", report.run_id);
    println!("  Status: {}", report.status.to_db_string());
    println!("  Started: {}", report.started_at);
    if let Some(finished) = &report.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(seconds) = report.duration_seconds {
        println!("  Duration: {}s", seconds);
    }
    println!("  Config hash: {}", report.config_hash);
    println!();

    print_statistics(&report.statistics);
}
