//! Completion cache (component I): a capacity-bounded, thread-safe map from
//! a normalized cache key to an unfiltered completion list.
//!
//! `storage::UnifiedCache` evicts purely by TTL and has no capacity cap;
//! this cache is deliberately the other shape — `lru::LruCache` behind a
//! `parking_lot::Mutex`, evicting by access order once full, with no
//! time-based expiry at all (the IPC server owns freshness by re-querying
//! providers on every miss).

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::pcd::PcdSuggestion;

/// A single suggestion as handed to the shell, independent of which
/// provider produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionItem {
    pub text: String,
    pub description: Option<String>,
    pub score: Option<f64>,
}

impl From<PcdSuggestion> for CompletionItem {
    fn from(s: PcdSuggestion) -> Self {
        Self {
            text: s.short_path,
            description: s.tooltip,
            score: Some(s.score),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionCacheEntry {
    pub key: String,
    pub items: Vec<CompletionItem>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub hit_count: u64,
}

pub struct CompletionCache {
    inner: Mutex<LruCache<String, CompletionCacheEntry>>,
}

impl CompletionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
        }
    }

    /// Store the UNFILTERED item list for `key`. The caller (IPC server) is
    /// responsible for prefix-filtering before returning to the shell.
    pub fn set(&self, key: &str, items: Vec<CompletionItem>) {
        let mut inner = self.inner.lock();
        inner.put(
            key.to_string(),
            CompletionCacheEntry {
                key: key.to_string(),
                items,
                created_at: chrono::Utc::now(),
                hit_count: 0,
            },
        );
    }

    /// Look up `key`, bumping its hit counter and LRU recency on success.
    pub fn try_get(&self, key: &str) -> Option<Vec<CompletionItem>> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.items.clone())
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key policy from §4.I: drop the current partial word from the
/// command line, split on spaces, drop empties, join with `|`.
///
/// Examples: `"scoop h"` -> `"scoop"`, `"git checkout m"` -> `"git|checkout"`,
/// `"scoop "` -> `"scoop"`.
pub fn cache_key(command_line: &str, word_to_complete: &str) -> String {
    let without_word = if word_to_complete.is_empty() {
        command_line.to_string()
    } else if let Some(idx) = command_line.rfind(word_to_complete) {
        let mut s = command_line.to_string();
        s.replace_range(idx..idx + word_to_complete.len(), "");
        s
    } else {
        command_line.to_string()
    };

    without_word
        .split(' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> CompletionItem {
        CompletionItem {
            text: text.to_string(),
            description: None,
            score: None,
        }
    }

    #[test]
    fn cache_key_drops_partial_word() {
        assert_eq!(cache_key("scoop h", "h"), "scoop");
        assert_eq!(cache_key("git checkout m", "m"), "git|checkout");
        assert_eq!(cache_key("scoop ", ""), "scoop");
    }

    #[test]
    fn set_then_try_get_round_trips() {
        let cache = CompletionCache::new(4);
        cache.set("git", vec![item("status"), item("commit")]);
        let items = cache.try_get("git").unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn try_get_increments_hit_count() {
        let cache = CompletionCache::new(4);
        cache.set("git", vec![item("status")]);
        cache.try_get("git");
        cache.try_get("git");
        let inner = cache.inner.lock();
        let entry = inner.peek("git").unwrap();
        assert_eq!(entry.hit_count, 2);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = CompletionCache::new(1);
        cache.set("git", vec![item("status")]);
        cache.set("docker", vec![item("ps")]);
        assert!(cache.try_get("git").is_none());
        assert!(cache.try_get("docker").is_some());
    }

    #[test]
    fn clear_empties_cache() {
        let cache = CompletionCache::new(4);
        cache.set("git", vec![item("status")]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
