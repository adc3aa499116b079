//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! alignment statistics from the storage layer.

use crate::storage::Storage;
use crate::Result;

/// Number of hashtags listed in the statistics
pub const TOP_HASHTAGS: usize = 10;

/// Alignment statistics summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentStatistics {
    /// Posts stored from the dumps
    pub posts: u64,

    /// Known redirect mappings
    pub redirects: u64,

    /// Stored page contents
    pub webpages: u64,

    /// Resolved (hashtag, final URL, post) records
    pub alignments: u64,

    /// Unresolved audit records of regular posts
    pub unresolved: u64,

    /// Unresolved audit records of spam posts
    pub unresolved_spam: u64,

    /// Most aligned hashtags with their record counts
    pub top_hashtags: Vec<(String, u64)>,
}

impl AlignmentStatistics {
    /// Share of audited regular (hashtag, URL) pairs that were resolved
    pub fn resolution_rate(&self) -> f64 {
        if self.unresolved == 0 {
            return 0.0;
        }
        (self.alignments as f64 / self.unresolved as f64) * 100.0
    }
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> Result<AlignmentStatistics> {
    Ok(AlignmentStatistics {
        posts: storage.count_posts()?,
        redirects: storage.count_redirects()?,
        webpages: storage.count_webpages()?,
        alignments: storage.count_alignments()?,
        unresolved: storage.count_unresolved_alignments(Some(false))?,
        unresolved_spam: storage.count_unresolved_alignments(Some(true))?,
        top_hashtags: storage.top_hashtags(TOP_HASHTAGS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &AlignmentStatistics) {
    println!("=== Alignment Statistics ===\n");

    println!("Overview:");
    println!("  Posts stored: {}", stats.posts);
    println!("  Redirects known: {}", stats.redirects);
    println!("  Pages stored: {}", stats.webpages);
    println!();

    println!("Alignments:");
    println!("  Resolved: {}", stats.alignments);
    println!("  Audited pairs: {}", stats.unresolved);
    println!("  Audited spam pairs: {}", stats.unresolved_spam);
    println!("  Resolution rate: {:.1}%", stats.resolution_rate());
    println!();

    if !stats.top_hashtags.is_empty() {
        println!("Top Hashtags:");
        for (hashtag, count) in &stats.top_hashtags {
            println!("  #{}: {}", hashtag, count);
        }
    }
}
