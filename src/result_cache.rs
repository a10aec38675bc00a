//! In-memory TTL+LRU cache of finished screenshot artifacts, keyed by the
//! normalized request shape (C8).
//!
//! Grounded on the teacher's `resource_cache` concept but scoped to whole
//! results rather than sub-resources, and backed by `moka` the way the other
//! corpus repos use it for process-local result memoization instead of a
//! hand-rolled LRU.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::config::OutputFormat;

#[derive(Debug, Clone)]
pub struct CachedResult {
    pub artifact_url: String,
    pub content_type: String,
    pub byte_size: u64,
}

pub struct ResultCache {
    cache: Cache<String, CachedResult>,
    /// Side index from source URL to every key derived from it, so
    /// `invalidate_by_url` (§4.8) doesn't have to guess which dimension/format
    /// combinations were ever requested.
    keys_by_url: dashmap::DashMap<String, DashSet<String>>,
    enabled: bool,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration, max_items: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .build();
        Self {
            cache,
            keys_by_url: dashmap::DashMap::new(),
            enabled,
        }
    }

    pub fn key(url: &str, width: u32, height: u32, format: OutputFormat) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b":");
        hasher.update(width.to_le_bytes());
        hasher.update(b":");
        hasher.update(height.to_le_bytes());
        hasher.update(b":");
        hasher.update(format_tag(format).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `bypass` mirrors the per-request cache-bypass flag in §6; a bypassed
    /// lookup always misses but a successful capture is still written back so
    /// subsequent non-bypassed requests benefit.
    pub fn get(&self, key: &str, bypass: bool) -> Option<CachedResult> {
        if !self.enabled || bypass {
            return None;
        }
        self.cache.get(key)
    }

    pub fn put(&self, url: &str, key: String, result: CachedResult) {
        if !self.enabled {
            return;
        }
        self.keys_by_url
            .entry(url.to_string())
            .or_default()
            .insert(key.clone());
        self.cache.insert(key, result);
    }

    /// Removes every entry ever derived from `url`, tracked via the
    /// `keys_by_url` side index recorded at `put` time (§4.8's O(n) scan,
    /// scoped to the one URL's own keys rather than the whole cache).
    pub fn invalidate_by_url(&self, url: &str) {
        if let Some((_, keys)) = self.keys_by_url.remove(url) {
            for key in keys {
                self.cache.invalidate(&key);
            }
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.keys_by_url.clear();
    }

    pub fn stats(&self) -> ResultCacheStats {
        self.cache.run_pending_tasks();
        ResultCacheStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
            enabled: self.enabled,
        }
    }
}

pub fn shared(enabled: bool, ttl: Duration, max_items: u64) -> Arc<ResultCache> {
    Arc::new(ResultCache::new(enabled, ttl, max_items))
}

fn format_tag(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Png => "png",
        OutputFormat::Jpeg => "jpeg",
        OutputFormat::Webp => "webp",
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultCacheStats {
    pub entry_count: u64,
    pub weighted_size: u64,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_distinguishes_dimensions() {
        let a = ResultCache::key("https://example.com", 800, 600, OutputFormat::Png);
        let b = ResultCache::key("https://example.com", 800, 600, OutputFormat::Png);
        let c = ResultCache::key("https://example.com", 1024, 768, OutputFormat::Png);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::new(true, Duration::from_secs(60), 100);
        let key = ResultCache::key("https://example.com", 800, 600, OutputFormat::Png);
        cache.put(
            "https://example.com",
            key.clone(),
            CachedResult {
                artifact_url: "file:///artifacts/a.png".into(),
                content_type: "image/png".into(),
                byte_size: 1234,
            },
        );
        let hit = cache.get(&key, false).expect("should hit");
        assert_eq!(hit.byte_size, 1234);
    }

    #[test]
    fn bypass_flag_always_misses() {
        let cache = ResultCache::new(true, Duration::from_secs(60), 100);
        let key = ResultCache::key("https://example.com", 800, 600, OutputFormat::Png);
        cache.put(
            "https://example.com",
            key.clone(),
            CachedResult {
                artifact_url: "file:///artifacts/a.png".into(),
                content_type: "image/png".into(),
                byte_size: 1234,
            },
        );
        assert!(cache.get(&key, true).is_none());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ResultCache::new(false, Duration::from_secs(60), 100);
        let key = ResultCache::key("https://example.com", 800, 600, OutputFormat::Png);
        cache.put(
            "https://example.com",
            key.clone(),
            CachedResult {
                artifact_url: "file:///artifacts/a.png".into(),
                content_type: "image/png".into(),
                byte_size: 1234,
            },
        );
        assert!(cache.get(&key, false).is_none());
    }

    #[test]
    fn invalidate_by_url_removes_only_that_urls_keys() {
        let cache = ResultCache::new(true, Duration::from_secs(60), 100);
        let key_a = ResultCache::key("https://a.example.com", 800, 600, OutputFormat::Png);
        let key_b = ResultCache::key("https://b.example.com", 800, 600, OutputFormat::Png);
        cache.put(
            "https://a.example.com",
            key_a.clone(),
            CachedResult {
                artifact_url: "file:///artifacts/a.png".into(),
                content_type: "image/png".into(),
                byte_size: 1,
            },
        );
        cache.put(
            "https://b.example.com",
            key_b.clone(),
            CachedResult {
                artifact_url: "file:///artifacts/b.png".into(),
                content_type: "image/png".into(),
                byte_size: 1,
            },
        );
        cache.invalidate_by_url("https://a.example.com");
        assert!(cache.get(&key_a, false).is_none());
        assert!(cache.get(&key_b, false).is_some());
    }
}
