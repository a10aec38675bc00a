//! Navigate + screenshot with strategy fallback and bounded retry (C6).
//!
//! Rewritten from the teacher's single-strategy `ScreenshotService::capture_screenshot`:
//! this tries navigation strategies in increasing cost order, escalates to a
//! fresh browser on a target-closed failure, and scales every timeout down
//! under load the way the admission controller (C7) reports it.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, NavigateParams,
};
use chromiumoxide::page::ScreenshotParams;
use tracing::{debug, warn};

use crate::config::{OutputFormat, Settings};
use crate::error::ScreenshotError;
use crate::interceptor::{self, BlockPolicy, InterceptorCounters};
use crate::resource_cache::{CacheabilityMode, ResourceCache};
use crate::tab_pool::TabPool;
use crate::url_rewrite::RuleTable;

#[derive(Debug, Clone, Copy)]
enum NavStrategy {
    Commit,
    DomContentLoaded,
    NetworkIdle,
    Load,
}

impl NavStrategy {
    const ORDER: [NavStrategy; 4] = [
        NavStrategy::Commit,
        NavStrategy::DomContentLoaded,
        NavStrategy::NetworkIdle,
        NavStrategy::Load,
    ];

    fn timeout_fraction(self) -> f64 {
        match self {
            NavStrategy::Commit => 0.40,
            NavStrategy::DomContentLoaded => 0.70,
            NavStrategy::NetworkIdle => 0.50,
            NavStrategy::Load => 0.90,
        }
    }
}

pub struct CaptureRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub deadline: Duration,
}

pub struct CaptureOutput {
    pub bytes: Vec<u8>,
    pub final_url: Option<String>,
}

pub struct CapturePipeline {
    tab_pool: Arc<TabPool>,
    resource_cache: Arc<ResourceCache>,
    cacheability: CacheabilityMode,
    block_policy: BlockPolicy,
    settings: Settings,
    rule_table: Arc<RuleTable>,
}

impl CapturePipeline {
    pub fn new(
        tab_pool: Arc<TabPool>,
        resource_cache: Arc<ResourceCache>,
        cacheability: CacheabilityMode,
        block_policy: BlockPolicy,
        settings: Settings,
        rule_table: Arc<RuleTable>,
    ) -> Self {
        Self {
            tab_pool,
            resource_cache,
            cacheability,
            block_policy,
            settings,
            rule_table,
        }
    }

    /// `pool_utilization` comes from C7 and scales timeouts per §4.6's
    /// adaptive-timeout rule. The whole retry loop is bounded by
    /// `request.deadline` (§5: "a capture that exceeds `request_deadline` is
    /// cancelled and returns `deadline_exceeded`") — the nav-strategy ladder
    /// plus fresh-browser retries can otherwise run well past it.
    pub async fn capture(
        &self,
        request: CaptureRequest,
        pool_utilization: f64,
    ) -> Result<CaptureOutput, ScreenshotError> {
        let scale = adaptive_scale(pool_utilization);
        let base_timeout = self.settings.navigation_timeout_regular.mul_f64(scale);
        let screenshot_timeout = self.settings.screenshot_timeout.mul_f64(scale);
        let deadline = request.deadline;

        let attempts = async {
            let mut fresh_retries = 0u32;
            loop {
                match self
                    .capture_once(&request, base_timeout, screenshot_timeout)
                    .await
                {
                    Ok(output) => return Ok(output),
                    Err(CaptureFailure::TargetClosed)
                        if fresh_retries < self.settings.max_fresh_retries =>
                    {
                        fresh_retries += 1;
                        warn!(fresh_retries, "target closed mid-capture, retrying on a fresh browser");
                        continue;
                    }
                    Err(CaptureFailure::TargetClosed) => return Err(ScreenshotError::BrowserProcessDied(
                        "max fresh-browser retries exceeded".to_string(),
                    )),
                    Err(CaptureFailure::Timeout) => return Err(ScreenshotError::Timeout(base_timeout)),
                    Err(CaptureFailure::Unreachable(msg)) => return Err(ScreenshotError::NetworkError(msg)),
                    Err(CaptureFailure::ScreenshotFailed(msg)) => {
                        return Err(ScreenshotError::CaptureFailed(msg))
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(ScreenshotError::DeadlineExceeded),
        }
    }

    async fn capture_once(
        &self,
        request: &CaptureRequest,
        base_timeout: Duration,
        screenshot_timeout: Duration,
    ) -> Result<CaptureOutput, CaptureFailure> {
        let mut guard = self
            .tab_pool
            .acquire(Duration::from_secs(10))
            .await
            .map_err(|_| CaptureFailure::TargetClosed)?;

        let page = guard.page().clone();

        let _ = page
            .execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(request.width as i64)
                    .height(request.height as i64)
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .expect("required fields are always set"),
            )
            .await;

        let counters = Arc::new(InterceptorCounters::default());
        let _interceptor = interceptor::install_with_timeout(
            page.clone(),
            self.resource_cache.clone(),
            self.cacheability,
            self.block_policy,
            counters,
            self.settings.route_setup_timeout,
        )
        .await;

        // C1: navigation uses the rewritten URL; the original `request.url`
        // is what callers fingerprint for cache keys, so rewriting here never
        // touches cache behavior.
        let rewritten = crate::url_rewrite::rewrite(&request.url, &self.rule_table.load());
        let nav_result = self.navigate_with_fallback(&page, &rewritten, base_timeout).await;
        let final_url = match nav_result {
            Ok(url) => url,
            Err(NavFailure::TargetClosed) => {
                guard.mark_faulted().await;
                return Err(CaptureFailure::TargetClosed);
            }
            Err(NavFailure::AllStrategiesTimedOut) => return Err(CaptureFailure::Timeout),
            Err(NavFailure::Unreachable(msg)) => return Err(CaptureFailure::Unreachable(msg)),
        };

        tokio::time::sleep(self.settings.settle_timeout).await;

        let bytes = self.screenshot(&page, request.format, screenshot_timeout).await?;

        Ok(CaptureOutput { bytes, final_url })
    }

    async fn navigate_with_fallback(
        &self,
        page: &chromiumoxide::Page,
        url: &str,
        base_timeout: Duration,
    ) -> Result<Option<String>, NavFailure> {
        let mut last_err: Option<NavFailure> = None;
        for strategy in NavStrategy::ORDER {
            let timeout = base_timeout.mul_f64(strategy.timeout_fraction());
            match tokio::time::timeout(timeout, page.execute(NavigateParams::new(url))).await {
                Ok(Ok(_)) => {
                    let final_url = page.url().await.ok().flatten();
                    return Ok(final_url);
                }
                Ok(Err(err)) => {
                    let msg = err.to_string();
                    if is_target_closed(&msg) {
                        return Err(NavFailure::TargetClosed);
                    }
                    if is_unreachable(&msg) {
                        last_err = Some(NavFailure::Unreachable(msg));
                        continue;
                    }
                    debug!(strategy = ?strategy, error = %msg, "navigation strategy failed, trying next");
                    last_err = Some(NavFailure::AllStrategiesTimedOut);
                }
                Err(_) => {
                    debug!(strategy = ?strategy, "navigation strategy timed out, trying next");
                    last_err = Some(NavFailure::AllStrategiesTimedOut);
                }
            }
        }
        Err(last_err.unwrap_or(NavFailure::AllStrategiesTimedOut))
    }

    async fn screenshot(
        &self,
        page: &chromiumoxide::Page,
        format: OutputFormat,
        timeout: Duration,
    ) -> Result<Vec<u8>, CaptureFailure> {
        let cdp_format = match format {
            OutputFormat::Png => CaptureScreenshotFormat::Png,
            OutputFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            OutputFormat::Webp => CaptureScreenshotFormat::Webp,
        };
        let params = ScreenshotParams::builder()
            .format(cdp_format)
            .full_page(true)
            .build();

        match tokio::time::timeout(timeout, page.screenshot(params.clone())).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => {
                let msg = err.to_string();
                if is_target_closed(&msg) {
                    return Err(CaptureFailure::TargetClosed);
                }
                Err(CaptureFailure::ScreenshotFailed(msg))
            }
            Err(_) => {
                // One retry allowed on timeout, per §4.6 step 5.
                match tokio::time::timeout(timeout, page.screenshot(params)).await {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(err)) => Err(CaptureFailure::ScreenshotFailed(err.to_string())),
                    Err(_) => Err(CaptureFailure::ScreenshotFailed("screenshot timed out twice".into())),
                }
            }
        }
    }
}

enum NavFailure {
    TargetClosed,
    AllStrategiesTimedOut,
    Unreachable(String),
}

enum CaptureFailure {
    TargetClosed,
    Timeout,
    Unreachable(String),
    ScreenshotFailed(String),
}

fn is_target_closed(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("closed") || lower.contains("target crashed") || lower.contains("no target")
}

fn is_unreachable(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("dns") || lower.contains("connection refused") || lower.contains("err_name_not_resolved")
}

/// §4.6: "if C7 reports pool utilization > 0.70, multiply all timeouts by
/// max(0.5, 1 - (util - 0.70) * 1.67)".
fn adaptive_scale(utilization: f64) -> f64 {
    if utilization <= 0.70 {
        1.0
    } else {
        (1.0 - (utilization - 0.70) * 1.67).max(0.5)
    }
}

/// Re-encodes PNG screenshot bytes to JPEG/WebP, matching the teacher's
/// `convert_image_format` (the browser driver only produces PNG/JPEG/WebP
/// directly via CDP in some versions; this keeps format conversion available
/// as a fallback path).
pub fn convert_image_format(png_bytes: &[u8], target: OutputFormat) -> Result<Vec<u8>, ScreenshotError> {
    if matches!(target, OutputFormat::Png) {
        return Ok(png_bytes.to_vec());
    }
    let img = image::load_from_memory(png_bytes)
        .map_err(|e| ScreenshotError::CaptureFailed(format!("decode failed: {e}")))?;
    let mut out = Vec::new();
    let format = match target {
        OutputFormat::Jpeg => image::ImageOutputFormat::Jpeg(90),
        OutputFormat::Webp => image::ImageOutputFormat::WebP,
        OutputFormat::Png => unreachable!(),
    };
    img.write_to(&mut std::io::Cursor::new(&mut out), format)
        .map_err(|e| ScreenshotError::CaptureFailed(format!("encode failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_scale_is_identity_below_threshold() {
        assert_eq!(adaptive_scale(0.5), 1.0);
        assert_eq!(adaptive_scale(0.70), 1.0);
    }

    #[test]
    fn adaptive_scale_shrinks_above_threshold_and_floors_at_half() {
        assert!((adaptive_scale(0.85) - (1.0 - 0.15 * 1.67)).abs() < 1e-9);
        assert_eq!(adaptive_scale(1.0), 0.5);
    }

    #[test]
    fn nav_strategy_order_and_fractions_match_spec() {
        let fractions: Vec<f64> = NavStrategy::ORDER.iter().map(|s| s.timeout_fraction()).collect();
        assert_eq!(fractions, vec![0.40, 0.70, 0.50, 0.90]);
    }
}
