//! Content-addressed on-disk cache for sub-resources fetched during capture (C2).
//!
//! Layout is sharded by the first bytes of the fingerprint, the same scheme
//! the corpus's `FsCache` uses: `{root}/{fp[0..2]}/{fp[2..4]}/{fp}.json` holds
//! metadata, `{fp}.bin` holds the body. The in-memory `DashMap` index avoids a
//! directory walk on every lookup; writes go through a single `tokio::Mutex`
//! so store/evict/purge never race each other, while lookups stay lock-free.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SELECTIVE_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".png", ".jpg", ".jpeg",
    ".gif", ".webp", ".svg", ".ico", ".mp4", ".webm", ".ogg", ".mp3", ".wav",
];

const ALL_CONTENT_EXCLUDED_PATHS: &[&str] = &[
    "/api/", "/graphql", "/webhook", "/callback", "/auth/", "/login", "/logout", "/session",
    "/ws/", "/websocket", "/sse/", "/stream", "/analytics", "/track", "/pixel", "/beacon",
    "/admin/", "/manage/", "/dashboard",
];

const ALL_CONTENT_EXCLUDED_QUERY_KEYS: &[&str] = &[
    "timestamp", "time", "rand", "random", "nonce", "token", "session",
];

#[derive(Debug, Clone, Copy)]
pub enum CacheabilityMode {
    Selective { priority_cdns: &'static [&'static str] },
    AllContent,
}

impl CacheabilityMode {
    pub fn is_cacheable(&self, url: &url::Url) -> bool {
        match self {
            CacheabilityMode::Selective { priority_cdns } => {
                let path = url.path().to_ascii_lowercase();
                let ext_match = SELECTIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
                let host_match = url
                    .host_str()
                    .map(|h| priority_cdns.contains(&h))
                    .unwrap_or(false);
                ext_match || host_match
            }
            CacheabilityMode::AllContent => {
                let path = url.path().to_ascii_lowercase();
                if ALL_CONTENT_EXCLUDED_PATHS.iter().any(|p| path.contains(p)) {
                    return false;
                }
                if let Some(query) = url.query() {
                    let query = query.to_ascii_lowercase();
                    if ALL_CONTENT_EXCLUDED_QUERY_KEYS
                        .iter()
                        .any(|k| query.contains(k))
                    {
                        return false;
                    }
                }
                true
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub fingerprint: String,
    pub size: u64,
    pub content_type: String,
    pub status: u16,
    pub created_at: u64,
    pub last_access: u64,
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub body: Arc<Vec<u8>>,
    pub content_type: String,
    pub status: u16,
}

pub fn fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ResourceCache {
    root: PathBuf,
    index: DashMap<String, CacheEntryMeta>,
    lru: Mutex<LruCache<String, ()>>,
    max_total_bytes: u64,
    max_entry_bytes: u64,
    ttl: Duration,
    total_bytes: std::sync::atomic::AtomicU64,
}

impl ResourceCache {
    pub fn new(root: impl Into<PathBuf>, max_total_bytes: u64, max_entry_bytes: u64, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            index: DashMap::new(),
            lru: Mutex::new(LruCache::unbounded()),
            max_total_bytes,
            max_entry_bytes,
            ttl,
            total_bytes: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn paths(&self, fp: &str) -> (PathBuf, PathBuf) {
        let shard = self.root.join(&fp[0..2]).join(&fp[2..4]);
        (shard.join(format!("{fp}.json")), shard.join(format!("{fp}.bin")))
    }

    pub async fn lookup(&self, url: &str) -> Option<CacheHit> {
        let fp = fingerprint(url);
        let mut meta = self.index.get_mut(&fp)?;
        let now = now_unix();
        if now.saturating_sub(meta.created_at) > self.ttl.as_secs() {
            drop(meta);
            self.remove_entry(&fp).await;
            return None;
        }
        meta.last_access = now;
        let (_, body_path) = self.paths(&fp);
        match fs::read(&body_path).await {
            Ok(body) => {
                self.lru.lock().await.put(fp.clone(), ());
                Some(CacheHit {
                    body: Arc::new(body),
                    content_type: meta.content_type.clone(),
                    status: meta.status,
                })
            }
            Err(err) => {
                warn!(fp = %fp, error = %err, "resource cache body missing, dropping entry");
                drop(meta);
                self.remove_entry(&fp).await;
                None
            }
        }
    }

    pub async fn store(
        &self,
        url: &str,
        bytes: &[u8],
        content_type: &str,
        status: u16,
    ) -> Result<(), CacheStoreError> {
        if bytes.len() as u64 > self.max_entry_bytes {
            return Err(CacheStoreError::TooLarge);
        }
        let fp = fingerprint(url);
        let (meta_path, body_path) = self.paths(&fp);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        write_atomic(&body_path, bytes).await?;
        let meta = CacheEntryMeta {
            fingerprint: fp.clone(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            status,
            created_at: now_unix(),
            last_access: now_unix(),
        };
        write_atomic(&meta_path, serde_json::to_string(&meta)?.as_bytes()).await?;

        if let Some(prev) = self.index.insert(fp.clone(), meta) {
            self.total_bytes
                .fetch_sub(prev.size, std::sync::atomic::Ordering::Relaxed);
        }
        self.total_bytes
            .fetch_add(bytes.len() as u64, std::sync::atomic::Ordering::Relaxed);
        self.lru.lock().await.put(fp, ());

        self.evict_to_fit().await;
        Ok(())
    }

    pub async fn evict_to_fit(&self) {
        while self.total_bytes.load(std::sync::atomic::Ordering::Relaxed) > self.max_total_bytes {
            let victim = self.lru.lock().await.pop_lru().map(|(k, _)| k);
            match victim {
                Some(fp) => self.remove_entry(&fp).await,
                None => break,
            }
        }
    }

    pub async fn purge_expired(&self) {
        let now = now_unix();
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|e| now.saturating_sub(e.created_at) > self.ttl.as_secs())
            .map(|e| e.key().clone())
            .collect();
        for fp in expired {
            self.remove_entry(&fp).await;
        }
    }

    pub async fn clear(&self) {
        let keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        for fp in keys {
            self.remove_entry(&fp).await;
        }
    }

    pub fn stats(&self) -> ResourceCacheStats {
        ResourceCacheStats {
            entries: self.index.len(),
            total_bytes: self.total_bytes.load(std::sync::atomic::Ordering::Relaxed),
            max_total_bytes: self.max_total_bytes,
        }
    }

    async fn remove_entry(&self, fp: &str) {
        if let Some((_, meta)) = self.index.remove(fp) {
            self.total_bytes
                .fetch_sub(meta.size, std::sync::atomic::Ordering::Relaxed);
        }
        self.lru.lock().await.pop(fp);
        let (meta_path, body_path) = self.paths(fp);
        let _ = fs::remove_file(meta_path).await;
        let _ = fs::remove_file(body_path).await;
        debug!(fp = %fp, "resource cache entry removed");
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceCacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_total_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheStoreError {
    #[error("entry exceeds max_entry_bytes")]
    TooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runs `purge_expired` + `evict_to_fit` on `cleanup_interval`, matching the
/// background sweep the teacher runs for its own pool health checks.
pub async fn run_cleanup_task(cache: Arc<ResourceCache>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        cache.purge_expired().await;
        cache.evict_to_fit().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_lookup_round_trips_bytes() {
        let dir = tempdir();
        let cache = ResourceCache::new(&dir, 1024 * 1024, 1024 * 1024, Duration::from_secs(60));
        cache
            .store("https://example.com/a.css", b"body { color: red }", "text/css", 200)
            .await
            .unwrap();
        let hit = cache.lookup("https://example.com/a.css").await.unwrap();
        assert_eq!(&*hit.body, b"body { color: red }");
        assert_eq!(hit.content_type, "text/css");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let dir = tempdir();
        let cache = ResourceCache::new(&dir, 1024, 4, Duration::from_secs(60));
        let err = cache
            .store("https://example.com/a.js", b"too big", "text/javascript", 200)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheStoreError::TooLarge));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn eviction_respects_total_byte_budget() {
        let dir = tempdir();
        let cache = ResourceCache::new(&dir, 10, 10, Duration::from_secs(60));
        cache.store("https://a/1", b"12345", "text/plain", 200).await.unwrap();
        cache.store("https://a/2", b"67890", "text/plain", 200).await.unwrap();
        cache.store("https://a/3", b"abcde", "text/plain", 200).await.unwrap();
        assert!(cache.stats().total_bytes <= 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn selective_mode_matches_by_extension_or_cdn_host() {
        let mode = CacheabilityMode::Selective {
            priority_cdns: &["cdn.example.com"],
        };
        assert!(mode.is_cacheable(&url::Url::parse("https://x.com/app.js").unwrap()));
        assert!(mode.is_cacheable(&url::Url::parse("https://cdn.example.com/x").unwrap()));
        assert!(!mode.is_cacheable(&url::Url::parse("https://x.com/api/data").unwrap()));
    }

    #[test]
    fn all_content_mode_excludes_dynamic_paths_and_queries() {
        let mode = CacheabilityMode::AllContent;
        assert!(!mode.is_cacheable(&url::Url::parse("https://x.com/api/data").unwrap()));
        assert!(!mode.is_cacheable(&url::Url::parse("https://x.com/p?token=abc").unwrap()));
        assert!(mode.is_cacheable(&url::Url::parse("https://x.com/p").unwrap()));
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "resource_cache_test_{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
