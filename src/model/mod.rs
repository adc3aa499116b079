//! Data model shared by ingestion, crawling and persistence
//!
//! # Components
//!
//! - `Post`: one record of the post dump, as delivered by the source reader
//! - `AlignmentCandidate`: immutable work item awaiting URL resolution
//! - `AlignmentRecord` / `UnresolvedAlignmentRecord`: the two output tuples
//! - `RedirectEntry` / `WebPage`: crawl results persisted to the sinks

mod candidate;
mod post;
mod records;

pub use candidate::AlignmentCandidate;
pub use post::{Post, PostId};
pub use records::{AlignmentRecord, RedirectEntry, UnresolvedAlignmentRecord, WebPage};
