use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use decant_common::types::{Classification, ExtractionMetadata, HierarchyCodes, ImportCacheStats};
use decant_common::NodeId;

/// Fingerprint of a successful import, kept so a repeat of the same URL
/// within the TTL short-circuits the whole pipeline.
#[derive(Clone, Debug)]
pub struct CachedImport {
    pub node_id: NodeId,
    pub classification: Classification,
    pub hierarchy_codes: HierarchyCodes,
    pub extraction_metadata: ExtractionMetadata,
    pub cached_at: DateTime<Utc>,
}

/// In-process import result cache keyed by normalized URL, with TTL
/// expiry and explicit invalidation by URL or substring pattern.
///
/// Process-wide state: constructed once in `main`, rebuilt per test.
pub struct ImportCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct CacheEntry {
    value: CachedImport,
    inserted_at: Instant,
}

impl ImportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
        }
    }

    pub fn get(&self, normalized_url: &str) -> Option<CachedImport> {
        let mut inner = self.inner.lock().unwrap();

        let expired = inner
            .entries
            .get(normalized_url)
            .is_some_and(|e| e.inserted_at.elapsed() >= self.ttl);
        if expired {
            inner.entries.remove(normalized_url);
            inner.evictions += 1;
        }

        let found = inner.entries.get(normalized_url).map(|e| e.value.clone());
        match found {
            Some(value) => {
                inner.hits += 1;
                metrics::counter!("import.cache.hits").increment(1);
                Some(value)
            }
            None => {
                inner.misses += 1;
                metrics::counter!("import.cache.misses").increment(1);
                None
            }
        }
    }

    pub fn insert(&self, normalized_url: String, value: CachedImport) {
        let mut inner = self.inner.lock().unwrap();

        // Evict expired entries on insert.
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        inner.evictions += (before - inner.entries.len()) as u64;

        inner.entries.insert(
            normalized_url,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, normalized_url: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.entries.remove(normalized_url).is_some();
        if removed {
            inner.evictions += 1;
        }
        removed
    }

    /// Remove every entry whose URL contains the pattern. Returns the
    /// count removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|url, _| !url.contains(pattern));
        let removed = (before - inner.entries.len()) as u64;
        inner.evictions += removed;
        removed
    }

    /// Drop every entry. Returns the count removed.
    pub fn clear(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.entries.len() as u64;
        inner.entries.clear();
        inner.evictions += count;
        count
    }

    pub fn stats(&self) -> ImportCacheStats {
        let inner = self.inner.lock().unwrap();
        ImportCacheStats {
            entries: inner.entries.len() as u64,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

/// Canonical cache key for a URL: lowercased scheme and host, fragment
/// dropped, trailing slash trimmed from non-root paths.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url.trim()) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);

    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() != "/" {
        out.pop();
    } else if parsed.path() == "/" && parsed.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use decant_common::types::{ExtractionMethod, HierarchyCodes};

    fn cached(node_id: NodeId) -> CachedImport {
        CachedImport {
            node_id,
            classification: Classification::fallback(),
            hierarchy_codes: HierarchyCodes {
                function: "U.INBOX.O.x".into(),
                organization: "PERSONAL.x".into(),
            },
            extraction_metadata: ExtractionMetadata::new(ExtractionMethod::Fallback, 0.3),
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = ImportCache::new(Duration::from_secs(300));
        let id = NodeId::new();
        cache.insert("https://example.com/a".into(), cached(id));

        let hit = cache.get("https://example.com/a").unwrap();
        assert_eq!(hit.node_id, id);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_expiry() {
        let cache = ImportCache::new(Duration::from_millis(1));
        cache.insert("https://example.com/a".into(), cached(NodeId::new()));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("https://example.com/a").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_by_url_and_pattern() {
        let cache = ImportCache::new(Duration::from_secs(300));
        cache.insert("https://example.com/a".into(), cached(NodeId::new()));
        cache.insert("https://example.com/b".into(), cached(NodeId::new()));
        cache.insert("https://other.io/c".into(), cached(NodeId::new()));

        assert!(cache.invalidate("https://example.com/a"));
        assert!(!cache.invalidate("https://example.com/a"));
        assert_eq!(cache.invalidate_pattern("example.com"), 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path/"),
            "https://example.com/Path"
        );
        assert_eq!(
            normalize_url("https://example.com/a#section"),
            "https://example.com/a"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(
            normalize_url("https://example.com/a?q=1"),
            "https://example.com/a?q=1"
        );
    }
}
