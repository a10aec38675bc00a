//! Metrics collection (C12): real `metrics` macros feeding a Prometheus
//! recorder, plus the in-process `PerformanceTracker` that backs the
//! `/metrics` JSON snapshot and recent-error log served over HTTP.

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Thin wrapper over the `metrics` facade. Each method emits through the
/// globally installed recorder ([`PrometheusExporter::install`]); before
/// that recorder is installed these calls are silently dropped, which is
/// the crate's documented no-op behavior, not ours.
#[derive(Debug, Default, Clone, Copy)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_screenshot(&self, duration: Duration, success: bool) {
        if success {
            counter!("screenshots_taken_total").increment(1);
        } else {
            counter!("screenshots_failed_total").increment(1);
        }
        histogram!("screenshot_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn record_browser_usage(&self, active_instances: usize, total_instances: usize) {
        let utilization = if total_instances > 0 {
            active_instances as f64 / total_instances as f64
        } else {
            0.0
        };
        gauge!("browser_pool_utilization_ratio").set(utilization);
    }

    pub fn record_error(&self, error_type: &str) {
        counter!("errors_total", "kind" => error_type.to_string()).increment(1);
    }

    pub fn record_retry(&self) {
        counter!("retries_total").increment(1);
    }

    pub fn record_browser_restart(&self) {
        counter!("browser_restarts_total").increment(1);
    }

    pub fn set_queue_size(&self, size: usize) {
        gauge!("queue_size").set(size as f64);
    }

    pub fn set_active_requests(&self, count: usize) {
        gauge!("active_requests").set(count as f64);
    }

    pub fn set_admission_utilization(&self, utilization: f64) {
        gauge!("admission_utilization_ratio").set(utilization);
    }
}

const RESPONSE_TIME_RING_SIZE: usize = 1024;
const ERROR_RING_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub at: std::time::SystemTime,
}

/// Ring-buffered request timings and a bounded recent-error log, independent
/// of whatever Prometheus recorder is or isn't installed — this is what
/// backs the JSON `/metrics` snapshot, which needs percentiles the
/// Prometheus text exposition doesn't give back to us directly.
pub struct PerformanceTracker {
    request_times: Arc<RwLock<Vec<Duration>>>,
    error_rates: Arc<RwLock<HashMap<String, usize>>>,
    recent_errors: Arc<RwLock<std::collections::VecDeque<ErrorRecord>>>,
    max_samples: usize,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            request_times: Arc::new(RwLock::new(Vec::new())),
            error_rates: Arc::new(RwLock::new(HashMap::new())),
            recent_errors: Arc::new(RwLock::new(std::collections::VecDeque::with_capacity(
                ERROR_RING_SIZE,
            ))),
            max_samples: RESPONSE_TIME_RING_SIZE,
        }
    }

    pub async fn record_request_time(&self, duration: Duration) {
        let mut times = self.request_times.write().await;
        times.push(duration);
        if times.len() > self.max_samples {
            times.remove(0);
        }
    }

    pub async fn record_error_rate(&self, error_type: String) {
        let mut rates = self.error_rates.write().await;
        *rates.entry(error_type).or_insert(0) += 1;
    }

    pub async fn record_error(&self, kind: String, message: String) {
        self.record_error_rate(kind.clone()).await;
        let mut ring = self.recent_errors.write().await;
        if ring.len() >= ERROR_RING_SIZE {
            ring.pop_front();
        }
        ring.push_back(ErrorRecord {
            kind,
            message,
            at: std::time::SystemTime::now(),
        });
    }

    pub async fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().await.iter().cloned().collect()
    }

    pub async fn get_performance_stats(&self) -> PerformanceStats {
        let times = self.request_times.read().await;
        let errors = self.error_rates.read().await;

        let total_requests = times.len();
        let avg_duration = if total_requests > 0 {
            times.iter().map(|d| d.as_secs_f64()).sum::<f64>() / total_requests as f64
        } else {
            0.0
        };

        let mut sorted_times = times.clone();
        sorted_times.sort();
        let percentile = |p: f64| -> f64 {
            if total_requests == 0 {
                return 0.0;
            }
            let index = ((total_requests as f64 * p) as usize).min(total_requests - 1);
            sorted_times[index].as_secs_f64()
        };
        let p95_duration = percentile(0.95);
        let p99_duration = percentile(0.99);

        let throughput = if total_requests > 0 && avg_duration > 0.0 {
            1.0 / avg_duration
        } else {
            0.0
        };

        PerformanceStats {
            total_requests,
            average_duration: avg_duration,
            p95_duration,
            p99_duration,
            throughput,
            error_rates: errors.clone(),
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub average_duration: f64,
    pub p95_duration: f64,
    pub p99_duration: f64,
    pub throughput: f64,
    pub error_rates: HashMap<String, usize>,
}

/// Installs the global `metrics` recorder and exposes a text render of the
/// registered counters/gauges/histograms for the `/metrics` HTTP endpoint
/// (C12, §6). The axum handler owns the port binding; this just owns the
/// recorder handle.
pub struct PrometheusExporter {
    handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl PrometheusExporter {
    pub fn install() -> Result<Self, metrics_exporter_prometheus::BuildError> {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Structured JSON snapshot served by the `/metrics` and `/metrics/ws`
/// endpoints (§6) alongside the Prometheus text exposition.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub uptime_secs: u64,
    pub total_requests: usize,
    pub average_duration_secs: f64,
    pub p95_duration_secs: f64,
    pub p99_duration_secs: f64,
    pub throughput_per_sec: f64,
    pub error_rates: HashMap<String, usize>,
}

impl StateSnapshot {
    pub fn build(uptime: Duration, perf: &PerformanceStats) -> Self {
        Self {
            uptime_secs: uptime.as_secs(),
            total_requests: perf.total_requests,
            average_duration_secs: perf.average_duration,
            p95_duration_secs: perf.p95_duration,
            p99_duration_secs: perf.p99_duration,
            throughput_per_sec: perf.throughput,
            error_rates: perf.error_rates.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn performance_tracker_computes_percentiles() {
        let tracker = PerformanceTracker::new();
        for ms in [10, 20, 30, 40, 50] {
            tracker.record_request_time(Duration::from_millis(ms)).await;
        }
        let stats = tracker.get_performance_stats().await;
        assert_eq!(stats.total_requests, 5);
        assert!(stats.p95_duration >= stats.average_duration);
    }

    #[tokio::test]
    async fn error_ring_is_bounded() {
        let tracker = PerformanceTracker::new();
        for i in 0..(ERROR_RING_SIZE + 10) {
            tracker
                .record_error("timeout".to_string(), format!("err {i}"))
                .await;
        }
        assert_eq!(tracker.recent_errors().await.len(), ERROR_RING_SIZE);
    }
}
