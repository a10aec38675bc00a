//! Per-page request interception installed before every navigation (C3).
//!
//! Wired the way the corpus's CDP fetch-interception code does it: enable the
//! `Fetch` domain with two catch-all patterns — one at the Request stage, one
//! at the Response stage — and subscribe once to `Fetch.requestPaused`. A
//! paused event carries `response_status_code` only when it was delivered at
//! the Response stage, which is what distinguishes the two call sites in
//! `handle_request` below. Request-stage events decide block/cache-hit/pass;
//! Response-stage events (only generated for requests let through the request
//! stage) fetch the completed body via `Fetch.getResponseBody` and offer it to
//! the cache before continuing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, FulfillRequestParams,
    HeaderEntry,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::resource_cache::ResourceCache;

const HARD_BLOCK_SUFFIXES: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googletagmanager.com",
    "google-analytics.com",
    "facebook.net",
    "connect.facebook.net",
    "hotjar.com",
    "segment.io",
    "mixpanel.com",
    "amplitude.com",
];

#[derive(Debug, Clone, Copy)]
pub struct BlockPolicy {
    pub disable_analytics: bool,
    pub disable_ads: bool,
    pub disable_social_widgets: bool,
    pub disable_fonts: bool,
    pub disable_media: bool,
}

impl BlockPolicy {
    pub fn should_hard_block(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or("");
        if (self.disable_analytics || self.disable_ads || self.disable_social_widgets)
            && HARD_BLOCK_SUFFIXES.iter().any(|s| host.ends_with(s))
        {
            return true;
        }
        let path = url.path().to_ascii_lowercase();
        if self.disable_fonts
            && [".woff", ".woff2", ".ttf", ".otf", ".eot"]
                .iter()
                .any(|ext| path.ends_with(ext))
        {
            return true;
        }
        if self.disable_media
            && [".mp4", ".webm", ".ogg", ".mp3", ".wav"]
                .iter()
                .any(|ext| path.ends_with(ext))
        {
            return true;
        }
        false
    }
}

#[derive(Debug, Default)]
pub struct InterceptorCounters {
    pub blocked: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub stored: AtomicU64,
}

pub struct Interceptor {
    handle: JoinHandle<()>,
}

impl Interceptor {
    /// Installs the interceptor on `page`. Must complete within
    /// `route_setup_timeout`; the caller is responsible for racing this
    /// against that deadline and treating a timeout as "continue without
    /// interception" per §4.3.
    pub async fn install(
        page: Page,
        cache: Arc<ResourceCache>,
        cacheability: crate::resource_cache::CacheabilityMode,
        policy: BlockPolicy,
        counters: Arc<InterceptorCounters>,
    ) -> Result<Self, chromiumoxide::error::CdpError> {
        page.execute(
            fetch::EnableParams::builder()
                .pattern(
                    fetch::RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(fetch::RequestStage::Request)
                        .build(),
                )
                .pattern(
                    fetch::RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(fetch::RequestStage::Response)
                        .build(),
                )
                .handle_auth_requests(false)
                .build(),
        )
        .await?;

        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                handle_request(&page, &cache, cacheability, policy, &counters, &event).await;
            }
        });

        Ok(Self { handle })
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn handle_request(
    page: &Page,
    cache: &Arc<ResourceCache>,
    cacheability: crate::resource_cache::CacheabilityMode,
    policy: BlockPolicy,
    counters: &InterceptorCounters,
    event: &EventRequestPaused,
) {
    let request_id = event.request_id.clone();
    let url = match Url::parse(&event.request.url) {
        Ok(u) => u,
        Err(_) => {
            let _ = continue_request(page, request_id).await;
            return;
        }
    };

    if event.response_status_code.is_some() {
        handle_response_stage(page, cache, cacheability, counters, &request_id, &url, event).await;
        return;
    }

    if policy.should_hard_block(&url) {
        counters.blocked.fetch_add(1, Ordering::Relaxed);
        let _ = fail_request(page, request_id).await;
        return;
    }

    if !cacheability.is_cacheable(&url) {
        let _ = continue_request(page, request_id).await;
        return;
    }

    if let Some(hit) = cache.lookup(url.as_str()).await {
        counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        if fulfill_from_cache(page, request_id.clone(), &hit).await.is_err() {
            let _ = continue_request(page, request_id).await;
        }
        return;
    }

    counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    // Cache miss: let the real fetch happen. The response-stage event for
    // this same request id arrives next and is where the body gets stored.
    let _ = continue_request(page, request_id).await;
}

/// Runs only for requests that were cacheable and missed at the request
/// stage. Fetches the now-complete response body via `Fetch.getResponseBody`
/// and offers it to C2 before letting the response through unmodified.
async fn handle_response_stage(
    page: &Page,
    cache: &Arc<ResourceCache>,
    cacheability: crate::resource_cache::CacheabilityMode,
    counters: &InterceptorCounters,
    request_id: &fetch::RequestId,
    url: &Url,
    event: &EventRequestPaused,
) {
    if !cacheability.is_cacheable(url) {
        let _ = continue_request(page, request_id.clone()).await;
        return;
    }

    let status = event.response_status_code.unwrap_or(0) as u16;
    if status == 200 {
        if let Ok(body) = page
            .execute(fetch::GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            let bytes = decode_response_body(&body.result.body, body.result.base64_encoded);
            let content_type = event
                .response_headers
                .as_ref()
                .and_then(|headers| {
                    headers
                        .iter()
                        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
                        .map(|h| h.value.clone())
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());

            match cache.store(url.as_str(), &bytes, &content_type, status).await {
                Ok(()) => {
                    counters.stored.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    debug!(error = %err, url = %url, "resource cache store rejected");
                }
            }
        }
    }

    let _ = continue_request(page, request_id.clone()).await;
}

fn decode_response_body(body: &str, base64_encoded: bool) -> Vec<u8> {
    if base64_encoded {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .unwrap_or_default()
    } else {
        body.as_bytes().to_vec()
    }
}

async fn continue_request(
    page: &Page,
    request_id: fetch::RequestId,
) -> Result<(), chromiumoxide::error::CdpError> {
    page.execute(ContinueRequestParams::new(request_id))
        .await
        .map(|_| ())
}

async fn fail_request(
    page: &Page,
    request_id: fetch::RequestId,
) -> Result<(), chromiumoxide::error::CdpError> {
    page.execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
        .await
        .map(|_| ())
}

async fn fulfill_from_cache(
    page: &Page,
    request_id: fetch::RequestId,
    hit: &crate::resource_cache::CacheHit,
) -> Result<(), chromiumoxide::error::CdpError> {
    let headers = vec![HeaderEntry::new(
        "content-type".to_string(),
        hit.content_type.clone(),
    )];
    page.execute(
        FulfillRequestParams::builder()
            .request_id(request_id)
            .response_code(hit.status as i64)
            .response_headers(headers)
            .body(base64_encode(&hit.body))
            .build()
            .expect("required fields are always set"),
    )
    .await
    .map(|_| ())
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Installs the interceptor but gives up after `timeout`, matching the
/// "installation must complete within route_setup_timeout" requirement;
/// on timeout capture proceeds without interception for this page only.
pub async fn install_with_timeout(
    page: Page,
    cache: Arc<ResourceCache>,
    cacheability: crate::resource_cache::CacheabilityMode,
    policy: BlockPolicy,
    counters: Arc<InterceptorCounters>,
    timeout: Duration,
) -> Option<Interceptor> {
    match tokio::time::timeout(
        timeout,
        Interceptor::install(page, cache, cacheability, policy, counters),
    )
    .await
    {
        Ok(Ok(interceptor)) => Some(interceptor),
        Ok(Err(err)) => {
            warn!(error = %err, "interceptor installation failed, continuing without it");
            None
        }
        Err(_) => {
            debug!("interceptor installation timed out, continuing without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_block_matches_known_analytics_hosts() {
        let policy = BlockPolicy {
            disable_analytics: true,
            disable_ads: false,
            disable_social_widgets: false,
            disable_fonts: false,
            disable_media: false,
        };
        let url = Url::parse("https://www.google-analytics.com/collect").unwrap();
        assert!(policy.should_hard_block(&url));
    }

    #[test]
    fn hard_block_leaves_unrelated_hosts_alone() {
        let policy = BlockPolicy {
            disable_analytics: true,
            disable_ads: true,
            disable_social_widgets: true,
            disable_fonts: true,
            disable_media: true,
        };
        let url = Url::parse("https://example.com/app.js").unwrap();
        assert!(!policy.should_hard_block(&url));
    }

    #[test]
    fn fonts_blocked_only_when_configured() {
        let mut policy = BlockPolicy {
            disable_analytics: false,
            disable_ads: false,
            disable_social_widgets: false,
            disable_fonts: false,
            disable_media: false,
        };
        let url = Url::parse("https://fonts.example.com/a.woff2").unwrap();
        assert!(!policy.should_hard_block(&url));
        policy.disable_fonts = true;
        assert!(policy.should_hard_block(&url));
    }

    #[test]
    fn decodes_plain_and_base64_bodies() {
        assert_eq!(decode_response_body("hello", false), b"hello".to_vec());
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(b"hello")
        };
        assert_eq!(decode_response_body(&encoded, true), b"hello".to_vec());
    }
}
