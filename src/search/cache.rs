//! Query result cache.
//!
//! LRU keyed by `(query, options)` with a per-entry TTL and a global write
//! epoch. Every committed index write bumps the epoch; entries produced
//! under an older epoch miss. The lock is held only for map operations,
//! never across I/O.

use std::hash::Hash;
use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;

use crate::types::SearchRequest;
use crate::types::SearchResponse;

struct CacheEntry {
    response: SearchResponse,
    epoch: u64,
    created: Instant,
}

/// Thread-safe LRU query cache with TTL and epoch invalidation.
pub struct QueryCache {
    entries: Mutex<LruCache<u64, CacheEntry>>,
    ttl: Duration,
    epoch: Arc<AtomicU64>,
}

impl QueryCache {
    /// Create a cache with the given capacity, TTL and shared epoch.
    ///
    /// The epoch counter is shared with the index engine, which bumps it on
    /// every committed write.
    pub fn new(capacity: usize, ttl: Duration, epoch: Arc<AtomicU64>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            epoch,
        }
    }

    /// Current write epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Look up a cached response; stale and prior-epoch entries miss and
    /// are evicted.
    pub fn get(&self, request: &SearchRequest) -> Option<SearchResponse> {
        let key = request_key(request);
        let current_epoch = self.epoch();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = entries.get(&key) {
            if entry.epoch == current_epoch && entry.created.elapsed() < self.ttl {
                return Some(entry.response.clone());
            }
        } else {
            return None;
        }
        // Stale or prior-epoch: evict.
        entries.pop(&key);
        None
    }

    /// Store a response under the current epoch.
    pub fn put(&self, request: &SearchRequest, response: SearchResponse) {
        let key = request_key(request);
        let entry = CacheEntry {
            response,
            epoch: self.epoch(),
            created: Instant::now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .put(key, entry);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash of every request field that affects results.
fn request_key(request: &SearchRequest) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    request.query.hash(&mut hasher);
    request.limit.hash(&mut hasher);
    request.include_content.hash(&mut hasher);
    request.file_extensions.hash(&mut hasher);
    request.path_filter.hash(&mut hasher);
    request.exclude_paths.hash(&mut hasher);
    request.context_lines.hash(&mut hasher);
    request.max_snippet_chars.hash(&mut hasher);
    request.max_snippet_blocks.hash(&mut hasher);
    request.vector_weight.map(f32::to_bits).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchHit;

    fn response(paths: &[&str]) -> SearchResponse {
        SearchResponse {
            hits: paths
                .iter()
                .map(|path| SearchHit {
                    path: path.to_string(),
                    score: 1.0,
                    method: crate::types::MatchMethod::Lexical,
                    matched_terms: None,
                    similarity: None,
                    language: None,
                    chunk_type: "function".to_string(),
                    start_line: 1,
                    end_line: 1,
                    snippet: None,
                })
                .collect(),
            index_ready: true,
        }
    }

    fn cache(ttl: Duration) -> (QueryCache, Arc<AtomicU64>) {
        let epoch = Arc::new(AtomicU64::new(0));
        (QueryCache::new(8, ttl, epoch.clone()), epoch)
    }

    #[test]
    fn test_hit_and_miss() {
        let (cache, _epoch) = cache(Duration::from_secs(60));
        let request = SearchRequest::new("query");

        assert!(cache.get(&request).is_none());
        cache.put(&request, response(&["a.rs"]));

        let cached = cache.get(&request).unwrap();
        assert_eq!(cached.hits.len(), 1);
        assert_eq!(cached.hits[0].path, "a.rs");
    }

    #[test]
    fn test_different_options_different_keys() {
        let (cache, _epoch) = cache(Duration::from_secs(60));
        let request = SearchRequest::new("query");
        cache.put(&request, response(&["a.rs"]));

        let mut other = SearchRequest::new("query");
        other.limit = 5;
        assert!(cache.get(&other).is_none());

        let mut filtered = SearchRequest::new("query");
        filtered.path_filter = Some("src/".to_string());
        assert!(cache.get(&filtered).is_none());
    }

    #[test]
    fn test_epoch_bump_invalidates() {
        let (cache, epoch) = cache(Duration::from_secs(60));
        let request = SearchRequest::new("query");
        cache.put(&request, response(&["a.rs"]));
        assert!(cache.get(&request).is_some());

        // A write anywhere bumps the epoch; the entry now misses.
        epoch.fetch_add(1, Ordering::SeqCst);
        assert!(cache.get(&request).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let (cache, _epoch) = cache(Duration::from_millis(0));
        let request = SearchRequest::new("query");
        cache.put(&request, response(&["a.rs"]));
        // Zero TTL: immediately stale.
        assert!(cache.get(&request).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let epoch = Arc::new(AtomicU64::new(0));
        let cache = QueryCache::new(2, Duration::from_secs(60), epoch);

        for i in 0..3 {
            let request = SearchRequest::new(format!("query {i}"));
            cache.put(&request, response(&["a.rs"]));
        }
        assert_eq!(cache.len(), 2);
        // Oldest entry evicted.
        assert!(cache.get(&SearchRequest::new("query 0")).is_none());
        assert!(cache.get(&SearchRequest::new("query 2")).is_some());
    }
}
