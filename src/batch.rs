//! Batch job store and scheduler (C9).
//!
//! Grounded on the corpus's atomic write-temp-then-rename manifest pattern
//! (the same discipline [`crate::resource_cache`] and [`crate::storage`] use
//! for their own on-disk writes) plus a `dashmap` in-memory index so a hot job
//! never needs a disk read. Item ids are caller-supplied per §3; job ids are
//! `uuid::Uuid::new_v4()`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::capture::{CapturePipeline, CaptureRequest};
use crate::config::OutputFormat;
use crate::error::ApiError;
use crate::result_cache::{CachedResult, ResultCache};
use crate::storage::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemInput {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub status: ItemStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub parallel: usize,
    pub timeout_secs: u64,
    pub webhook: Option<String>,
    pub webhook_auth: Option<String>,
    pub fail_fast: bool,
    pub cache: bool,
}

impl BatchConfig {
    pub fn effective_parallelism(&self) -> usize {
        self.parallel.clamp(1, 10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: String,
    pub items: Vec<BatchItem>,
    pub config: BatchConfig,
    pub status: JobStatus,
    pub reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
}

impl BatchJob {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.status == ItemStatus::Success).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.status == ItemStatus::Failed).count()
    }

    fn recompute_status(&mut self) {
        let total = self.items.len();
        let settled = self.succeeded() + self.failed();
        let now = now_unix();
        self.updated_at = now;

        if settled == 0 {
            return;
        }
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Processing;
        }

        if settled < total {
            if self.config.fail_fast && self.failed() > 0 {
                self.status = JobStatus::Failed;
                self.reason = Some("fail_fast".to_string());
                self.completed_at = Some(now);
            }
            return;
        }

        self.completed_at = Some(now);
        self.status = if self.failed() == 0 {
            JobStatus::Completed
        } else if self.succeeded() == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        };
        if self.status == JobStatus::Failed && self.reason.is_none() {
            self.reason = Some("all_items_failed".to_string());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("job not found")]
    NotFound,
    #[error("item not found")]
    ItemNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct BatchStore {
    dir: PathBuf,
    persistence_enabled: bool,
    index: DashMap<String, Arc<RwLock<BatchJob>>>,
}

impl BatchStore {
    pub fn new(dir: impl Into<PathBuf>, persistence_enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            persistence_enabled,
            index: DashMap::new(),
        }
    }

    fn job_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    pub async fn create(&self, items: Vec<BatchItemInput>, config: BatchConfig) -> Result<Arc<RwLock<BatchJob>>, BatchError> {
        let job_id = Uuid::new_v4().to_string();
        let now = now_unix();
        let job = BatchJob {
            job_id: job_id.clone(),
            items: items
                .into_iter()
                .map(|i| BatchItem {
                    id: i.id,
                    url: i.url,
                    width: i.width,
                    height: i.height,
                    format: i.format,
                    status: ItemStatus::Pending,
                    result: None,
                    error: None,
                })
                .collect(),
            config,
            status: JobStatus::Queued,
            reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.persist(&job).await?;
        let handle = Arc::new(RwLock::new(job));
        self.index.insert(job_id, handle.clone());
        Ok(handle)
    }

    /// In-memory first; on miss, reads `jobs/{job_id}.json` and caches it.
    pub async fn get(&self, job_id: &str) -> Option<Arc<RwLock<BatchJob>>> {
        if let Some(entry) = self.index.get(job_id) {
            return Some(entry.clone());
        }
        if !self.persistence_enabled {
            return None;
        }
        let bytes = fs::read(self.job_path(job_id)).await.ok()?;
        let job: BatchJob = serde_json::from_slice(&bytes).ok()?;
        let handle = Arc::new(RwLock::new(job));
        self.index.insert(job_id.to_string(), handle.clone());
        Some(handle)
    }

    pub async fn update_item(
        &self,
        job_id: &str,
        item_id: &str,
        status: ItemStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), BatchError> {
        let handle = self.get(job_id).await.ok_or(BatchError::NotFound)?;
        let snapshot = {
            let mut job = handle.write().await;
            let item = job
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or(BatchError::ItemNotFound)?;
            item.status = status;
            item.result = result;
            item.error = error;
            job.recompute_status();
            job.clone()
        };
        self.persist(&snapshot).await
    }

    pub async fn list_pending(&self) -> Vec<Arc<RwLock<BatchJob>>> {
        let mut pending = Vec::new();
        for entry in self.index.iter() {
            let job = entry.value().read().await;
            if matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
                pending.push(entry.value().clone());
            }
        }
        pending
    }

    pub async fn purge_expired(&self, ttl: Duration) {
        let now = now_unix();
        let mut expired = Vec::new();
        for entry in self.index.iter() {
            let job = entry.value().read().await;
            let reference = job.completed_at.unwrap_or(job.created_at);
            if now.saturating_sub(reference) > ttl.as_secs() {
                expired.push(entry.key().clone());
            }
        }
        for job_id in expired {
            self.index.remove(&job_id);
            if self.persistence_enabled {
                let _ = fs::remove_file(self.job_path(&job_id)).await;
            }
        }
    }

    async fn persist(&self, job: &BatchJob) -> Result<(), BatchError> {
        if !self.persistence_enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(job)?;
        let path = self.job_path(&job.job_id);
        let tmp = self.dir.join(format!("{}.json.tmp", job.job_id));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Startup reload per §4.9: scans the persistence directory, loads every
    /// job into the index, and marks any job still `processing` (no live
    /// scheduler survives a restart) `failed` with reason `restart_interrupted`
    /// — the Open Question decision recorded in DESIGN.md.
    pub async fn reload_from_disk(&self) -> Result<usize, BatchError> {
        if !self.persistence_enabled {
            return Ok(0);
        }
        fs::create_dir_all(&self.dir).await?;
        let mut reloaded = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            let mut job: BatchJob = match serde_json::from_slice(&bytes) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.reason = Some("restart_interrupted".to_string());
                job.updated_at = now_unix();
                job.completed_at = Some(job.updated_at);
                self.persist(&job).await?;
                warn!(job_id = %job.job_id, "batch job interrupted by restart, marked failed");
            }
            reloaded += 1;
            self.index.insert(job.job_id.clone(), Arc::new(RwLock::new(job)));
        }
        Ok(reloaded)
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Drives items through C7→C6 (optionally C8) with bounded parallelism and
/// delivers the completion webhook.
pub struct Scheduler {
    store: Arc<BatchStore>,
    admission: Arc<AdmissionController>,
    capture: Arc<CapturePipeline>,
    result_cache: Arc<ResultCache>,
    artifact_store: Arc<dyn ArtifactStore>,
    webhook_client: reqwest::Client,
}

impl Scheduler {
    pub fn new(
        store: Arc<BatchStore>,
        admission: Arc<AdmissionController>,
        capture: Arc<CapturePipeline>,
        result_cache: Arc<ResultCache>,
        artifact_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            store,
            admission,
            artifact_store,
            capture,
            result_cache,
            webhook_client: reqwest::Client::new(),
        }
    }

    pub fn spawn_job(self: Arc<Self>, job_id: String) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_job(job_id).await;
        })
    }

    async fn run_job(&self, job_id: String) {
        let Some(handle) = self.store.get(&job_id).await else {
            return;
        };
        let (config, item_ids): (BatchConfig, Vec<String>) = {
            let job = handle.read().await;
            (job.config.clone(), job.items.iter().map(|i| i.id.clone()).collect())
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let parallelism = config.effective_parallelism();
        let use_cache = config.cache;
        let fail_fast = config.fail_fast;
        let timeout = Duration::from_secs(config.timeout_secs);

        stream::iter(item_ids.into_iter())
            .map(|item_id| {
                let job_id = job_id.clone();
                let cancelled = cancelled.clone();
                async move {
                    if cancelled.load(Ordering::SeqCst) {
                        let _ = self
                            .store
                            .update_item(&job_id, &item_id, ItemStatus::Failed, None, Some("cancelled".to_string()))
                            .await;
                        return;
                    }
                    let failed = self.run_item(&job_id, &item_id, use_cache, timeout).await;
                    if failed && fail_fast {
                        cancelled.store(true, Ordering::SeqCst);
                    }
                }
            })
            .buffer_unordered(parallelism)
            .for_each(|_| async {})
            .await;

        self.deliver_webhook(&job_id).await;
    }

    /// Runs one item through admission + capture. Returns whether it failed.
    async fn run_item(&self, job_id: &str, item_id: &str, use_cache: bool, timeout: Duration) -> bool {
        let Some(handle) = self.store.get(job_id).await else {
            return true;
        };
        let item = {
            let mut job = handle.write().await;
            let item = job.items.iter_mut().find(|i| i.id == item_id);
            match item {
                Some(item) => {
                    item.status = ItemStatus::Running;
                    item.clone()
                }
                None => return true,
            }
        };

        let cache_key = ResultCache::key(&item.url, item.width, item.height, item.format);
        if use_cache {
            if let Some(hit) = self.result_cache.get(&cache_key, false) {
                let _ = self
                    .store
                    .update_item(job_id, item_id, ItemStatus::Success, Some(hit.artifact_url), None)
                    .await;
                return false;
            }
        }

        let outcome = self.capture_item(&item, timeout).await;
        match outcome {
            Ok(artifact_url) => {
                if use_cache {
                    self.result_cache.put(
                        &item.url,
                        cache_key,
                        CachedResult {
                            artifact_url: artifact_url.clone(),
                            content_type: content_type_for(item.format),
                            byte_size: 0,
                        },
                    );
                }
                let _ = self
                    .store
                    .update_item(job_id, item_id, ItemStatus::Success, Some(artifact_url), None)
                    .await;
                false
            }
            Err(err) => {
                let _ = self
                    .store
                    .update_item(job_id, item_id, ItemStatus::Failed, None, Some(err.to_string()))
                    .await;
                true
            }
        }
    }

    async fn capture_item(&self, item: &BatchItem, deadline: Duration) -> Result<String, ApiError> {
        let _guard = self.admission.admit().await?;
        let pool_utilization = self.admission.utilization();
        let result = self
            .capture
            .capture(
                CaptureRequest {
                    url: item.url.clone(),
                    width: item.width,
                    height: item.height,
                    format: item.format,
                    deadline,
                },
                pool_utilization,
            )
            .await;
        self.admission.record_outcome(result.is_ok());
        let output = result.map_err(|err| ApiError::from_capture(&err))?;
        self.artifact_store
            .put(&output.bytes, &content_type_for(item.format))
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))
    }

    async fn deliver_webhook(&self, job_id: &str) {
        let Some(handle) = self.store.get(job_id).await else {
            return;
        };
        let job = handle.read().await.clone();
        let Some(webhook) = job.config.webhook.clone() else {
            return;
        };

        let mut attempt = 0u32;
        loop {
            let mut request = self.webhook_client.post(&webhook).json(&job);
            if let Some(auth) = &job.config.webhook_auth {
                request = request.header("Authorization", auth.clone());
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(job_id = %job_id, "webhook delivered");
                    return;
                }
                Ok(resp) => {
                    warn!(job_id = %job_id, status = %resp.status(), "webhook rejected");
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "webhook delivery failed");
                }
            }
            attempt += 1;
            if attempt >= 3 {
                warn!(job_id = %job_id, "webhook delivery exhausted retries");
                return;
            }
            tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
        }
    }
}

fn content_type_for(format: OutputFormat) -> String {
    match format {
        OutputFormat::Png => "image/png",
        OutputFormat::Jpeg => "image/jpeg",
        OutputFormat::Webp => "image/webp",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: ItemStatus) -> BatchItem {
        BatchItem {
            id: id.to_string(),
            url: "https://example.com".to_string(),
            width: 800,
            height: 600,
            format: OutputFormat::Png,
            status,
            result: None,
            error: None,
        }
    }

    fn job_with(items: Vec<BatchItem>, fail_fast: bool) -> BatchJob {
        BatchJob {
            job_id: "job-1".to_string(),
            items,
            config: BatchConfig {
                parallel: 2,
                timeout_secs: 30,
                webhook: None,
                webhook_auth: None,
                fail_fast,
                cache: false,
            },
            status: JobStatus::Queued,
            reason: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    #[test]
    fn all_success_completes() {
        let mut job = job_with(vec![item("a", ItemStatus::Success), item("b", ItemStatus::Pending)], false);
        job.items[1].status = ItemStatus::Success;
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn mixed_without_fail_fast_is_partial() {
        let mut job = job_with(vec![item("a", ItemStatus::Success), item("b", ItemStatus::Failed)], false);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Partial);
    }

    #[test]
    fn all_failed_is_failed() {
        let mut job = job_with(vec![item("a", ItemStatus::Failed), item("b", ItemStatus::Failed)], false);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn fail_fast_opens_on_first_failure_before_all_settle() {
        let mut job = job_with(vec![item("a", ItemStatus::Failed), item("b", ItemStatus::Pending)], true);
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.reason.as_deref(), Some("fail_fast"));
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = std::env::temp_dir().join(format!("batch-store-test-{}", Uuid::new_v4()));
        let store = BatchStore::new(&dir, true);
        let handle = store
            .create(
                vec![BatchItemInput {
                    id: "a".to_string(),
                    url: "https://example.com".to_string(),
                    width: 800,
                    height: 600,
                    format: OutputFormat::Png,
                }],
                BatchConfig {
                    parallel: 1,
                    timeout_secs: 30,
                    webhook: None,
                    webhook_auth: None,
                    fail_fast: false,
                    cache: false,
                },
            )
            .await
            .unwrap();
        let job_id = handle.read().await.job_id.clone();

        let fetched = store.get(&job_id).await.unwrap();
        assert_eq!(fetched.read().await.items.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn processing_job_is_marked_failed_on_reload() {
        let dir = std::env::temp_dir().join(format!("batch-store-reload-test-{}", Uuid::new_v4()));
        let store = BatchStore::new(&dir, true);
        let handle = store
            .create(
                vec![BatchItemInput {
                    id: "a".to_string(),
                    url: "https://example.com".to_string(),
                    width: 800,
                    height: 600,
                    format: OutputFormat::Png,
                }],
                BatchConfig {
                    parallel: 1,
                    timeout_secs: 30,
                    webhook: None,
                    webhook_auth: None,
                    fail_fast: false,
                    cache: false,
                },
            )
            .await
            .unwrap();
        let job_id = handle.read().await.job_id.clone();
        {
            let mut job = handle.write().await;
            job.status = JobStatus::Processing;
        }
        store.persist(&handle.read().await.clone()).await.unwrap();

        let reloaded_store = BatchStore::new(&dir, true);
        reloaded_store.reload_from_disk().await.unwrap();
        let reloaded = reloaded_store.get(&job_id).await.unwrap();
        let job = reloaded.read().await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.reason.as_deref(), Some("restart_interrupted"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
