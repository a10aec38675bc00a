//! Fixed-capacity pool of Chrome browser processes (C4).
//!
//! This is the teacher's browser pool generalized to the spec's acquisition
//! discipline: admission control (C7) owns all concurrency gating now, so
//! this pool has no semaphore of its own — `acquire` instead loops
//! lock -> check/allocate -> unlock -> sleep(backoff) -> retry, which is the
//! safe pattern called out in the design notes (never sleep while holding the
//! pool lock; never let release depend on a recycle that might fail).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::Browser;
use futures::StreamExt;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{create_browser_config_with_instance_id, Config, Settings};
use crate::error::ScreenshotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Healthy,
    Busy,
    Unresponsive,
    Restarting,
    Failed,
}

pub struct BrowserInstance {
    pub id: usize,
    pub browser: Arc<Mutex<Browser>>,
    pub handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    pub last_used: Instant,
    pub acquired_at: Option<Instant>,
    pub pages_opened: usize,
    pub status: InstanceStatus,
    pub created_at: Instant,
    pub failure_count: usize,
    pub in_use: bool,
}

impl BrowserInstance {
    fn new(
        id: usize,
        browser: Browser,
        handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    ) -> Self {
        Self {
            id,
            browser: Arc::new(Mutex::new(browser)),
            handler,
            last_used: Instant::now(),
            acquired_at: None,
            pages_opened: 0,
            status: InstanceStatus::Healthy,
            created_at: Instant::now(),
            failure_count: 0,
            in_use: false,
        }
    }

    pub fn mark_used(&mut self) {
        self.last_used = Instant::now();
        self.acquired_at = Some(Instant::now());
        self.pages_opened += 1;
        self.in_use = true;
        self.status = InstanceStatus::Busy;
    }

    pub fn mark_available(&mut self) {
        self.last_used = Instant::now();
        self.acquired_at = None;
        self.in_use = false;
        if matches!(self.status, InstanceStatus::Busy) {
            self.status = InstanceStatus::Healthy;
        }
    }

    pub fn mark_failed(&mut self) {
        self.failure_count += 1;
    }

    pub fn is_healthy(&self, settings: &Settings) -> bool {
        !self.handler.is_finished()
            && self.failure_count < settings.browser_pool_health_threshold
            && self.pages_opened < settings.browser_pool_max_pages
            && self.age() < settings.browser_pool_max_age
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    async fn shutdown(self) {
        let _ = self.browser.lock().await.close().await;
        self.handler.abort();
    }
}

/// Scoped acquisition: dropping this releases the browser unconditionally.
/// Release never depends on whether a subsequent recycle succeeds.
pub struct BrowserHandle {
    pub browser: Arc<Mutex<Browser>>,
    pub instance_id: usize,
    pool: Arc<BrowserPool>,
    released: bool,
}

impl BrowserHandle {
    pub async fn mark_faulted(&mut self) {
        self.pool.mark_faulted(self.instance_id).await;
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let pool = self.pool.clone();
        let instance_id = self.instance_id;
        tokio::spawn(async move {
            pool.release(instance_id).await;
        });
    }
}

struct PoolInner {
    instances: Vec<BrowserInstance>,
    available: VecDeque<usize>,
}

enum ClaimOutcome {
    Claimed(BrowserHandle),
    Unhealthy(usize),
}

pub struct BrowserPool {
    inner: Mutex<PoolInner>,
    next_id: AtomicU64,
    config: Config,
    settings: Settings,
    is_shutting_down: AtomicBool,
    created_total: AtomicU64,
    recycled_total: AtomicU64,
    /// Notified (with the destroyed browser's id) after `recycle()` tears it
    /// down, so C5's per-browser tab table can drop its now-dangling entry
    /// without this module knowing `TabPool` exists (no back-pointers, per
    /// the design notes).
    on_recycle: std::sync::RwLock<Option<Arc<dyn Fn(usize) + Send + Sync>>>,
}

impl BrowserPool {
    pub async fn new(config: Config, settings: Settings) -> Result<Arc<Self>, ScreenshotError> {
        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner {
                instances: Vec::new(),
                available: VecDeque::new(),
            }),
            next_id: AtomicU64::new(0),
            config,
            settings,
            is_shutting_down: AtomicBool::new(false),
            created_total: AtomicU64::new(0),
            recycled_total: AtomicU64::new(0),
            on_recycle: std::sync::RwLock::new(None),
        });

        for i in 0..pool.settings.browser_pool_min {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            pool.spawn_instance().await?;
        }

        info!(
            size = pool.settings.browser_pool_min,
            "browser pool initialized"
        );
        Ok(pool)
    }

    async fn spawn_instance(&self) -> Result<usize, ScreenshotError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as usize;
        let instance = self.create_browser_instance(id).await?;
        let mut inner = self.inner.lock().await;
        inner.instances.push(instance);
        inner.available.push_back(id);
        self.created_total.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn create_browser_instance(&self, id: usize) -> Result<BrowserInstance, ScreenshotError> {
        let temp_dir = format!("/tmp/chromium-temp-{}-{}", std::process::id(), id);
        let user_data_dir = format!("/tmp/chromium-screenshot-{}-{}", std::process::id(), id);
        let runner_dir = format!("/tmp/chromiumoxide-runner-{}", id);

        std::fs::create_dir_all(&temp_dir)
            .map_err(|e| ScreenshotError::BrowserLaunchFailed(format!("temp dir: {e}")))?;
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| ScreenshotError::BrowserLaunchFailed(format!("user data dir: {e}")))?;
        std::fs::create_dir_all(&runner_dir)
            .map_err(|e| ScreenshotError::BrowserLaunchFailed(format!("runner dir: {e}")))?;

        let instance_config = create_browser_config_with_instance_id(&self.config, Some(id));

        let (browser, mut handler) = {
            std::env::set_var("TMPDIR", &runner_dir);
            let result = Browser::launch(instance_config).await;
            std::env::remove_var("TMPDIR");
            result
        }
        .map_err(|e| ScreenshotError::BrowserLaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("browser handler error: {e}");
                        return Err(e);
                    }
                    None => {
                        tracing::info!("browser handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        Ok(BrowserInstance::new(id, browser, handler_task))
    }

    /// Acquires an idle, healthy browser. Retries by re-entering the lock in
    /// a fresh critical section between waits — the lock is never held
    /// across the sleep.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<BrowserHandle, ScreenshotError> {
        if self.is_shutting_down.load(Ordering::Relaxed) {
            return Err(ScreenshotError::BrowserUnavailable);
        }

        let deadline = Instant::now() + timeout;
        let mut attempt: u32 = 0;

        loop {
            if let Some(handle) = self.try_acquire_once().await? {
                return Ok(handle);
            }

            attempt += 1;
            if attempt > self.settings.max_wait_attempts {
                return Err(ScreenshotError::BrowserUnavailable);
            }
            if Instant::now() >= deadline {
                return Err(ScreenshotError::Timeout(timeout));
            }

            let delay = backoff_with_jitter(attempt, Duration::from_millis(50), Duration::from_secs(2));
            tokio::time::sleep(delay).await;
        }
    }

    /// Single lock -> check/allocate -> unlock attempt. Never sleeps while
    /// the lock is held.
    async fn try_acquire_once(self: &Arc<Self>) -> Result<Option<BrowserHandle>, ScreenshotError> {
        let (candidate, should_scale) = {
            let mut inner = self.inner.lock().await;
            let candidate = inner.available.pop_front();
            let in_use = inner.instances.len() - inner.available.len();
            let utilization = if inner.instances.is_empty() {
                1.0
            } else {
                in_use as f64 / inner.instances.len() as f64
            };
            let can_grow = inner.instances.len() < self.settings.browser_pool_max;
            let should_scale = can_grow
                && (candidate.is_none() || utilization >= self.settings.browser_pool_scale_threshold);
            (candidate, should_scale)
        };

        if should_scale {
            let to_spawn = if candidate.is_none() {
                1
            } else {
                self.settings.browser_pool_scale_factor
            };
            for _ in 0..to_spawn {
                let inner_len = self.inner.lock().await.instances.len();
                if inner_len >= self.settings.browser_pool_max {
                    break;
                }
                if let Err(e) = self.spawn_instance().await {
                    warn!(error = %e, "preemptive browser scale-up failed");
                    break;
                }
            }
        }

        // Re-enter the lock in a fresh critical section to pick up either
        // the candidate found above, or one freshly spawned by scaling.
        let mut inner = self.inner.lock().await;
        let id = match candidate {
            Some(id) => Some(id),
            None => inner.available.pop_front(),
        };
        let outcome = id.and_then(|id| self.claim(&mut inner, id));
        drop(inner);

        match outcome {
            Some(ClaimOutcome::Claimed(handle)) => Ok(Some(handle)),
            Some(ClaimOutcome::Unhealthy(id)) => {
                // Mirror `release`'s pattern: schedule the recycle on a
                // detached task after dropping the lock, rather than leaving
                // the instance in neither `available` nor `in_use` — an
                // unhealthy idle instance must still be released -> recycled,
                // never just dropped from rotation.
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.recycle(id).await;
                });
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn claim(self: &Arc<Self>, inner: &mut PoolInner, id: usize) -> Option<ClaimOutcome> {
        let settings = &self.settings;
        let instance = inner.instances.iter_mut().find(|b| b.id == id)?;
        if !instance.is_healthy(settings) {
            return Some(ClaimOutcome::Unhealthy(id));
        }
        instance.mark_used();
        Some(ClaimOutcome::Claimed(BrowserHandle {
            browser: instance.browser.clone(),
            instance_id: id,
            pool: self.clone(),
            released: false,
        }))
    }

    /// Marks the browser idle unconditionally. Never gated on recycling: if
    /// the browser turns out unhealthy, a recycle is scheduled afterward on
    /// a detached task.
    pub async fn release(self: &Arc<Self>, instance_id: usize) {
        let needs_recycle = {
            let mut inner = self.inner.lock().await;
            if let Some(instance) = inner.instances.iter_mut().find(|b| b.id == instance_id) {
                instance.mark_available();
                inner.available.push_back(instance_id);
                !instance.is_healthy(&self.settings)
            } else {
                false
            }
        };

        if needs_recycle {
            let pool = self.clone();
            tokio::spawn(async move {
                pool.recycle(instance_id).await;
            });
        }
    }

    pub async fn mark_faulted(self: &Arc<Self>, instance_id: usize) {
        let mut inner = self.inner.lock().await;
        if let Some(instance) = inner.instances.iter_mut().find(|b| b.id == instance_id) {
            instance.mark_failed();
        }
    }

    /// Tears down a browser process and its contexts; the pool may relaunch
    /// a replacement on the next acquisition.
    pub async fn recycle(self: &Arc<Self>, instance_id: usize) {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.available.retain(|&id| id != instance_id);
            let pos = inner.instances.iter().position(|b| b.id == instance_id);
            pos.map(|p| inner.instances.remove(p))
        };
        if let Some(instance) = removed {
            instance.shutdown().await;
            self.recycled_total.fetch_add(1, Ordering::Relaxed);
            info!(instance_id, "browser instance recycled");
            let callback = self.on_recycle.read().expect("on_recycle lock poisoned").clone();
            if let Some(cb) = callback {
                cb(instance_id);
            }
        }
    }

    /// Registers a callback invoked with a browser's id once `recycle()` has
    /// torn it down. Set once at startup by whatever owns the per-browser tab
    /// table (C5).
    pub fn set_on_recycle(&self, callback: Arc<dyn Fn(usize) + Send + Sync>) {
        *self.on_recycle.write().expect("on_recycle lock poisoned") = Some(callback);
    }

    /// Used by the watchdog (C11): force-releases a browser stuck `in_use`
    /// past `force_release_after`, scheduling an async recycle.
    pub async fn force_release_stuck(self: &Arc<Self>, force_release_after: Duration, hard_stuck_after: Duration) -> (usize, usize) {
        let (to_release, to_recycle) = {
            let inner = self.inner.lock().await;
            let mut release = Vec::new();
            let mut recycle = Vec::new();
            for instance in inner.instances.iter() {
                if !instance.in_use {
                    continue;
                }
                let stuck_for = instance
                    .acquired_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if stuck_for > hard_stuck_after {
                    recycle.push(instance.id);
                } else if stuck_for > force_release_after {
                    release.push(instance.id);
                }
            }
            (release, recycle)
        };

        for id in &to_release {
            self.release(*id).await;
        }
        for id in &to_recycle {
            self.recycle(*id).await;
        }
        (to_release.len(), to_recycle.len())
    }

    /// C4's idle-recycle leg (spec §4.4: "recycled when ... idle >
    /// idle_timeout"): recycles browsers sitting in `available` past
    /// `browser_pool_idle_timeout`. `force_release_stuck` only scans
    /// `in_use` instances, so this is the sweep that retires idle capacity.
    pub async fn recycle_idle(self: &Arc<Self>, idle_timeout: Duration) -> usize {
        let to_recycle = {
            let inner = self.inner.lock().await;
            inner
                .instances
                .iter()
                .filter(|b| !b.in_use && b.idle_time() > idle_timeout)
                .map(|b| b.id)
                .collect::<Vec<_>>()
        };
        for id in &to_recycle {
            self.recycle(*id).await;
        }
        to_recycle.len()
    }

    pub async fn stats(&self) -> BrowserPoolStats {
        let inner = self.inner.lock().await;
        BrowserPoolStats {
            size: inner.instances.len(),
            in_use: inner.instances.len() - inner.available.len(),
            available: inner.available.len(),
            errors: inner.instances.iter().map(|b| b.failure_count).sum(),
            created_total: self.created_total.load(Ordering::Relaxed),
            recycled_total: self.recycled_total.load(Ordering::Relaxed),
        }
    }

    pub async fn shutdown(self: &Arc<Self>) {
        info!("shutting down browser pool");
        self.is_shutting_down.store(true, Ordering::Relaxed);

        let mut retries = 0;
        loop {
            let (size, available) = {
                let inner = self.inner.lock().await;
                (inner.instances.len(), inner.available.len())
            };
            if available == size || retries >= 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            retries += 1;
        }

        let instances = {
            let mut inner = self.inner.lock().await;
            inner.available.clear();
            std::mem::take(&mut inner.instances)
        };
        for instance in instances {
            instance.shutdown().await;
        }
        info!("browser pool shutdown complete");
    }
}

fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(cap.as_millis());
    let jitter_frac = rand::thread_rng().gen_range(0.5..1.0);
    Duration::from_millis((capped as f64 * jitter_frac) as u64)
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserPoolStats {
    pub size: usize,
    pub in_use: usize,
    pub available: usize,
    pub errors: usize,
    pub created_total: u64,
    pub recycled_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_respects_cap() {
        for attempt in 1..30 {
            let d = backoff_with_jitter(attempt, Duration::from_millis(50), Duration::from_secs(2));
            assert!(d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn backoff_grows_with_attempt_before_cap() {
        let early = backoff_with_jitter(1, Duration::from_millis(50), Duration::from_secs(2));
        assert!(early <= Duration::from_millis(100));
    }
}
