//! Throttled progress logging

use std::time::{Duration, Instant};
use tracing::info;

/// Minimum delay between two progress lines
pub const DEFAULT_REPORT_DELAY: Duration = Duration::from_secs(5);

/// Counts processed items and logs a rate at most once per delay
pub struct ProgressReport {
    label: &'static str,
    min_delay: Duration,
    started: Instant,
    last_report: Instant,
    count: u64,
    count_at_last_report: u64,
}

impl ProgressReport {
    pub fn new(label: &'static str) -> Self {
        Self::with_delay(label, DEFAULT_REPORT_DELAY)
    }

    pub fn with_delay(label: &'static str, min_delay: Duration) -> Self {
        let now = Instant::now();
        Self {
            label,
            min_delay,
            started: now,
            last_report: now,
            count: 0,
            count_at_last_report: 0,
        }
    }

    /// Adds `n` processed items, returns whether a progress line was logged
    pub fn add(&mut self, n: u64) -> bool {
        self.count += n;

        let now = Instant::now();
        let since_last = now.duration_since(self.last_report);
        if since_last < self.min_delay {
            return false;
        }

        let recent = self.count - self.count_at_last_report;
        info!(
            "Progress: {} {} processed ({:.1}/sec)",
            self.count,
            self.label,
            rate(recent, since_last)
        );

        self.last_report = now;
        self.count_at_last_report = self.count;
        true
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Logs the overall count and rate
    pub fn finish(&self) {
        let elapsed = self.started.elapsed();
        info!(
            "Done: {} {} in {:.1}s ({:.1}/sec)",
            self.count,
            self.label,
            elapsed.as_secs_f64(),
            rate(self.count, elapsed)
        );
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
