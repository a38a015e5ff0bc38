//! Bounded cache of task results.
//!
//! Keyed by task key. Error results are stored (so re-adds can observe
//! them) but never returned for reuse. When the cache fills up, the oldest
//! 80% of entries by completion time are evicted.

use std::collections::HashMap;

use crate::task::TaskResult;

/// Maximum number of cached results.
pub const MAX_CACHE_SIZE: usize = 1000;

pub struct ResultCache {
    max_size: usize,
    entries: HashMap<String, TaskResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_max_size(MAX_CACHE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: HashMap::new(),
        }
    }

    /// A cached non-error result for `key`, if any.
    pub fn get_ok(&self, key: &str) -> Option<&TaskResult> {
        self.entries.get(key).filter(|r| r.error.is_none())
    }

    pub fn put(&mut self, result: TaskResult) {
        if !self.entries.contains_key(&result.key) && self.entries.len() >= self.max_size {
            self.evict();
        }
        self.entries.insert(result.key.clone(), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        let keep = self.max_size / 5;
        let mut by_age: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = self
            .entries
            .iter()
            .map(|(k, r)| (k.clone(), r.completed_at))
            .collect();
        // Newest first; entries without a completion time go last.
        by_age.sort_by(|a, b| b.1.cmp(&a.1));
        for (key, _) in by_age.into_iter().skip(keep) {
            self.entries.remove(&key);
        }
        tracing::debug!(kept = self.entries.len(), "result cache evicted");
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
