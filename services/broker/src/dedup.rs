//! Recently-seen message ids.
//!
//! Everything the routing engine accepts passes through [`DedupStore::observe`]
//! first; a repeat within the dedup window is dropped before any routing.
//! Held under a std mutex and never locked across an await.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as seen.  Returns `false` when it was already present;
    /// the original sighting time is kept.
    pub fn observe(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.contains_key(id) {
            return false;
        }
        seen.insert(id.to_owned(), Instant::now());
        true
    }

    /// Drop entries older than `window`; returns how many were removed.
    pub fn purge_older_than(&self, window: Duration) -> usize {
        let mut seen = self.seen.lock().unwrap();
        let before = seen.len();
        let now = Instant::now();
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < window);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}
