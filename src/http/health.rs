//! `GET /health` (§6): aggregates C10 probe status, C12 performance snapshot,
//! and pool occupancy into one document.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub browser_pool: crate::browser_pool::BrowserPoolStats,
    pub admission: crate::admission::AdmissionStats,
    pub probe: Option<crate::health::HealthReport>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let browser_pool = state.browser_pool.stats().await;
    let admission = state.admission.stats();
    let probe = match &state.health_prober {
        Some(prober) => Some(prober.report().await),
        None => None,
    };
    let healthy = browser_pool.available > 0 || browser_pool.in_use < browser_pool.size;
    let healthy = healthy && probe.as_ref().map(|r| r.healthy).unwrap_or(true);

    Json(HealthResponse {
        healthy,
        uptime_secs: state.started_at.elapsed().as_secs(),
        browser_pool,
        admission,
        probe,
    })
}
