//! Cache admin surface (§6): `/cache/*` operates on the result cache (C8),
//! `/browser-cache/*` on the sub-resource cache (C2).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::resource_cache::ResourceCacheStats;
use crate::result_cache::ResultCacheStats;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

pub async fn result_cache_stats(State(state): State<Arc<AppState>>) -> Json<ResultCacheStats> {
    Json(state.result_cache.stats())
}

pub async fn result_cache_clear(State(state): State<Arc<AppState>>) -> StatusCode {
    state.result_cache.clear();
    StatusCode::NO_CONTENT
}

pub async fn result_cache_delete_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlQuery>,
) -> StatusCode {
    state.result_cache.invalidate_by_url(&query.url);
    StatusCode::NO_CONTENT
}

pub async fn resource_cache_stats(State(state): State<Arc<AppState>>) -> Json<ResourceCacheStats> {
    Json(state.resource_cache.stats())
}

pub async fn resource_cache_info(State(state): State<Arc<AppState>>) -> Json<ResourceCacheStats> {
    Json(state.resource_cache.stats())
}

pub async fn resource_cache_performance(
    State(state): State<Arc<AppState>>,
) -> Json<ResourceCacheStats> {
    Json(state.resource_cache.stats())
}

pub async fn resource_cache_test(State(state): State<Arc<AppState>>) -> StatusCode {
    let probe_url = "https://internal.health-probe.invalid/resource-cache-test";
    match state
        .resource_cache
        .store(probe_url, b"ok", "text/plain", 200)
        .await
    {
        Ok(()) => match state.resource_cache.lookup(probe_url).await {
            Some(_) => StatusCode::OK,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        },
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn resource_cache_cleanup(State(state): State<Arc<AppState>>) -> StatusCode {
    state.resource_cache.purge_expired().await;
    state.resource_cache.evict_to_fit().await;
    StatusCode::NO_CONTENT
}

pub async fn resource_cache_clear(State(state): State<Arc<AppState>>) -> StatusCode {
    state.resource_cache.clear().await;
    StatusCode::NO_CONTENT
}
