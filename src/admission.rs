//! Load shedding, bounded queueing, and circuit breaking at the request
//! boundary (C7). Every screenshot — single or batch item — passes through
//! here before it touches a browser.
//!
//! Acquisition order is fixed screenshot-semaphore-then-context-semaphore
//! everywhere in the process to rule out the classic two-semaphore deadlock;
//! release always happens in the opposite order via `AdmissionGuard`'s field
//! drop order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::config::Settings;
use crate::error::{ApiError, CircuitBreaker};

pub struct AdmissionController {
    screenshot_semaphore: Arc<Semaphore>,
    context_semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    settings: Settings,
    circuit: CircuitBreaker,
}

/// Held by a caller for the duration of one capture. Dropping it releases the
/// context permit before the screenshot permit (declaration order = drop
/// order), the reverse of acquisition order.
pub struct AdmissionGuard {
    context_permit: OwnedSemaphorePermit,
    screenshot_permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(settings: Settings) -> Self {
        Self {
            screenshot_semaphore: Arc::new(Semaphore::new(settings.max_concurrent_screenshots)),
            context_semaphore: Arc::new(Semaphore::new(settings.max_concurrent_contexts)),
            queued: AtomicUsize::new(0),
            circuit: CircuitBreaker::new(
                settings.circuit_breaker_threshold as usize,
                settings.circuit_breaker_reset_time,
            ),
            settings,
        }
    }

    pub fn utilization(&self) -> f64 {
        let total = self.settings.max_concurrent_screenshots.max(1) as f64;
        let in_use = total - self.screenshot_semaphore.available_permits() as f64;
        in_use / total
    }

    /// Admits one request, or rejects it per §5/§7. On success, the caller
    /// must report the outcome via [`AdmissionController::record_outcome`] so
    /// the circuit breaker stays accurate.
    pub async fn admit(&self) -> Result<AdmissionGuard, ApiError> {
        if !self.circuit.can_execute() {
            let retry_after_ms = self
                .circuit
                .open_remaining()
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            return Err(ApiError::CircuitOpen { retry_after_ms });
        }

        if self.settings.enable_load_shedding
            && self.utilization() >= self.settings.load_shedding_threshold
        {
            warn!(utilization = self.utilization(), "shedding load");
            return Err(ApiError::Overloaded);
        }

        if !self.settings.enable_request_queue {
            return self.try_admit_now();
        }

        let queued_now = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if queued_now > self.settings.max_queue_size {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ApiError::Overloaded);
        }

        let result = self.admit_queued().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn try_admit_now(&self) -> Result<AdmissionGuard, ApiError> {
        let screenshot_permit = self
            .screenshot_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ApiError::AcquireFailed)?;
        let context_permit = self
            .context_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ApiError::AcquireFailed)?;
        Ok(AdmissionGuard {
            context_permit,
            screenshot_permit,
        })
    }

    async fn admit_queued(&self) -> Result<AdmissionGuard, ApiError> {
        let screenshot_permit = tokio::time::timeout(
            self.settings.queue_timeout,
            self.screenshot_semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ApiError::QueueTimeout)?
        .map_err(|_| ApiError::AcquireFailed)?;

        let context_permit = tokio::time::timeout(
            self.settings.queue_timeout,
            self.context_semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ApiError::QueueTimeout)?
        .map_err(|_| ApiError::AcquireFailed)?;

        Ok(AdmissionGuard {
            context_permit,
            screenshot_permit,
        })
    }

    /// Feeds capture outcome back to the circuit breaker. Call once per
    /// admitted request after the capture settles, success or failure.
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.circuit.record_success();
        } else {
            self.circuit.record_failure();
        }
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            in_flight_screenshots: self.settings.max_concurrent_screenshots
                - self.screenshot_semaphore.available_permits(),
            in_flight_contexts: self.settings.max_concurrent_contexts
                - self.context_semaphore.available_permits(),
            queued: self.queued.load(Ordering::Relaxed),
            circuit_open: matches!(self.circuit.get_state(), crate::error::CircuitState::Open),
            utilization: self.utilization(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdmissionStats {
    pub in_flight_screenshots: usize,
    pub in_flight_contexts: usize,
    pub queued: usize,
    pub circuit_open: bool,
    pub utilization: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn test_settings(max_concurrent: usize, max_contexts: usize) -> Settings {
        let mut settings = Settings::default();
        settings.max_concurrent_screenshots = max_concurrent;
        settings.max_concurrent_contexts = max_contexts;
        settings.enable_request_queue = true;
        settings.max_queue_size = 2;
        settings.queue_timeout = Duration::from_millis(50);
        settings.enable_load_shedding = false;
        settings
    }

    #[tokio::test]
    async fn admits_up_to_capacity_then_queues() {
        let controller = AdmissionController::new(test_settings(1, 1));
        let first = controller.admit().await.expect("first admitted");
        assert_eq!(controller.stats().in_flight_screenshots, 1);
        drop(first);
    }

    #[tokio::test]
    async fn queue_timeout_yields_queue_timeout_error() {
        let controller = AdmissionController::new(test_settings(1, 1));
        let _held = controller.admit().await.expect("first admitted");
        let second = controller.admit().await;
        assert!(matches!(second, Err(ApiError::QueueTimeout)));
    }

    #[tokio::test]
    async fn load_shedding_rejects_before_queueing() {
        let mut settings = test_settings(1, 1);
        settings.enable_load_shedding = true;
        settings.load_shedding_threshold = 0.5;
        let controller = AdmissionController::new(settings);
        let _held = controller.admit().await.expect("first admitted");
        let second = controller.admit().await;
        assert!(matches!(second, Err(ApiError::Overloaded)));
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_failures() {
        let mut settings = test_settings(4, 4);
        settings.circuit_breaker_threshold = 2;
        let controller = AdmissionController::new(settings);
        controller.record_outcome(false);
        controller.record_outcome(false);
        let result = controller.admit().await;
        assert!(matches!(result, Err(ApiError::CircuitOpen { .. })));
    }
}
