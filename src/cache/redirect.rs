use crate::cache::LruMap;
use crate::config::CacheConfig;
use crate::model::RedirectEntry;
use crate::storage::SharedStorage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// What a lookup does when the in-memory front misses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissPolicy {
    /// Report the URL as unknown right away
    FastPath,
    /// Consult the persistent tier before reporting the URL as unknown
    CheckPersisted,
}

impl MissPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.check_persisted {
            Self::CheckPersisted
        } else {
            Self::FastPath
        }
    }
}

/// Source URL to resolved URL cache shared by all batch attempts
///
/// The LRU lock and the storage lock are never held at the same time.
pub struct RedirectCache {
    lru: Mutex<LruMap<String, String>>,
    storage: SharedStorage,
    policy: MissPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedirectCache {
    pub fn new(storage: SharedStorage, capacity: usize, policy: MissPolicy) -> Self {
        Self {
            lru: Mutex::new(LruMap::new(capacity)),
            storage,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig, storage: SharedStorage) -> Self {
        Self::new(storage, config.capacity, MissPolicy::from_config(config))
    }

    fn lru(&self) -> MutexGuard<'_, LruMap<String, String>> {
        self.lru.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves `url` without touching the network
    pub fn lookup(&self, url: &str) -> Option<String> {
        if let Some(to) = self.lru().get(&url.to_string()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(to);
        }

        let persisted = match self.policy {
            MissPolicy::FastPath => None,
            MissPolicy::CheckPersisted => self.lookup_persisted(url),
        };

        match persisted {
            Some(to) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(self.lru().insert_if_absent(url.to_string(), to))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn lookup_persisted(&self, url: &str) -> Option<String> {
        let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        match storage.lookup_redirect(url) {
            Ok(to) => to,
            Err(e) => {
                warn!(url, error = %e, "Persistent redirect lookup failed");
                None
            }
        }
    }

    /// Records a redirect and returns the authoritative target
    ///
    /// If `from` was recorded before, the earlier target wins.
    pub fn record(&self, from: &str, to: &str) -> String {
        let persisted = {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.record_redirect(from, to)
        };

        let to = match persisted {
            Ok(authoritative) => authoritative,
            Err(e) => {
                warn!(from, to, error = %e, "Failed to persist redirect");
                to.to_string()
            }
        };

        self.lru().insert_if_absent(from.to_string(), to)
    }

    /// Records many redirects in one storage transaction
    ///
    /// Returns the authoritative target for every `from` in `entries`.
    pub fn record_all(&self, entries: &[RedirectEntry]) -> HashMap<String, String> {
        if entries.is_empty() {
            return HashMap::new();
        }

        let persisted = {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.record_redirects(entries)
        };

        let mut authoritative: HashMap<String, String> = match persisted {
            Ok(recorded) => recorded.into_iter().map(|e| (e.from, e.to)).collect(),
            Err(e) => {
                warn!(count = entries.len(), error = %e, "Failed to persist redirects");
                HashMap::new()
            }
        };

        let mut lru = self.lru();
        for entry in entries {
            let to = authoritative
                .remove(&entry.from)
                .unwrap_or_else(|| entry.to.clone());
            let to = lru.insert_if_absent(entry.from.clone(), to);
            authoritative.insert(entry.from.clone(), to);
        }
        debug!(count = entries.len(), cached = lru.len(), "Redirects recorded");

        authoritative
    }

    /// Number of redirects held in memory
    pub fn len(&self) -> usize {
        self.lru().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> MissPolicy {
        self.policy
    }

    /// Lookup hits and misses so far
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
