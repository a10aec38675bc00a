//! HTTP boundary (§6): axum router wiring every external endpoint onto
//! [`AppState`]. Layered with tracing/CORS/timeout the way the corpus wires
//! its own axum services.

pub mod batch;
pub mod cache;
pub mod health;
pub mod metrics;
pub mod rewrite;
pub mod screenshot;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/screenshot", post(screenshot::take_screenshot))
        .route("/batch/screenshots", post(batch::create_batch))
        .route("/batch/screenshots/:job_id", get(batch::get_batch_status))
        .route(
            "/batch/screenshots/:job_id/results",
            get(batch::get_batch_results),
        )
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::snapshot))
        .route("/metrics/prometheus", get(metrics::prometheus_text))
        .route("/metrics/ws", get(metrics::metrics_ws))
        .route("/cache/stats", get(cache::result_cache_stats))
        .route("/cache", delete(cache::result_cache_clear))
        .route("/cache/url", delete(cache::result_cache_delete_url))
        .route("/browser-cache/stats", get(cache::resource_cache_stats))
        .route("/browser-cache/info", get(cache::resource_cache_info))
        .route(
            "/browser-cache/performance",
            get(cache::resource_cache_performance),
        )
        .route("/browser-cache/test", get(cache::resource_cache_test))
        .route(
            "/browser-cache/cleanup",
            post(cache::resource_cache_cleanup),
        )
        .route("/browser-cache/clear", delete(cache::resource_cache_clear))
        .route("/url-transformer/rules", get(rewrite::list_rules))
        .route("/url-transformer/rules", post(rewrite::set_rule))
        .route("/url-transformer/rules/:host", delete(rewrite::delete_rule))
        .route("/url-transformer/transform", post(rewrite::transform))
        .route("/url-transformer/check", get(rewrite::check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .with_state(state)
}
