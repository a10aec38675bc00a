//! Health prober (C10): periodic synthetic capture against a configured
//! probe URL, independent of and never itself gating the admission
//! controller — it only reports, per §4.10.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::capture::{CapturePipeline, CaptureRequest};
use crate::config::OutputFormat;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_probe_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub total_probes: u64,
    pub total_failures: u64,
}

/// Runs a synthetic capture against `probe_url` every `interval`, always
/// with the result cache bypassed so the probe exercises the real pipeline.
pub struct HealthProber {
    capture: Arc<CapturePipeline>,
    probe_url: String,
    interval: Duration,
    timeout: Duration,
    consecutive_failures: AtomicU32,
    total_probes: AtomicU64,
    total_failures: AtomicU64,
    last_probe_duration_ms: RwLock<Option<u64>>,
    last_error: RwLock<Option<String>>,
}

impl HealthProber {
    pub fn new(
        capture: Arc<CapturePipeline>,
        probe_url: String,
        interval: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            capture,
            probe_url,
            interval,
            timeout,
            consecutive_failures: AtomicU32::new(0),
            total_probes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            last_probe_duration_ms: RwLock::new(None),
            last_error: RwLock::new(None),
        })
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.probe_once().await;
            }
        })
    }

    async fn probe_once(&self) {
        let started = std::time::Instant::now();
        let result = self
            .capture
            .capture(
                CaptureRequest {
                    url: self.probe_url.clone(),
                    width: 800,
                    height: 600,
                    format: OutputFormat::Png,
                    deadline: self.timeout,
                },
                0.0,
            )
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.total_probes.fetch_add(1, Ordering::Relaxed);
        *self.last_probe_duration_ms.write().await = Some(elapsed_ms);

        match result {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.last_error.write().await = None;
                info!(elapsed_ms, "health probe succeeded");
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                *self.last_error.write().await = Some(err.to_string());
                warn!(error = %err, failures, "health probe failed");
            }
        }
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport {
            healthy: self.consecutive_failures.load(Ordering::Relaxed) == 0,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_probe_duration_ms: *self.last_probe_duration_ms.read().await,
            last_error: self.last_error.read().await.clone(),
            total_probes: self.total_probes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}
