//! Redirect cache
//!
//! An in-memory LRU front over the persistent `redirects` table. A source URL
//! recorded once keeps its target forever.

mod lru;
mod redirect;

pub use lru::LruMap;
pub use redirect::{MissPolicy, RedirectCache};
