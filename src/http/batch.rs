//! `POST /batch/screenshots` and friends (§6): creates and reports on batch
//! jobs backed by [`crate::batch::BatchStore`] and [`crate::batch::Scheduler`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::batch::{BatchConfig, BatchItemInput, BatchJob, JobStatus};
use crate::error::ApiError;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBatchBody {
    pub items: Vec<BatchItemInput>,
    pub config: BatchConfig,
}

pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBatchBody>,
) -> Result<Response, ApiError> {
    if body.items.is_empty() {
        return Err(ApiError::Validation("items must not be empty".to_string()));
    }
    if !(1..=10).contains(&body.config.parallel) {
        return Err(ApiError::Validation("parallel must be in 1..=10".to_string()));
    }
    if !(1..=60).contains(&body.config.timeout_secs) {
        return Err(ApiError::Validation("timeout must be in 1..=60 seconds".to_string()));
    }

    let handle = state
        .batch_store
        .create(body.items, body.config)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let job = handle.read().await.clone();

    state.scheduler.clone().spawn_job(job.job_id.clone());

    Ok((StatusCode::ACCEPTED, Json(job)).into_response())
}

pub async fn get_batch_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<BatchJob>, ApiError> {
    let handle = state
        .batch_store
        .get(&job_id)
        .await
        .ok_or_else(|| ApiError::Validation("job not found".to_string()))?;
    Ok(Json(handle.read().await.clone()))
}

pub async fn get_batch_results(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let handle = match state.batch_store.get(&job_id).await {
        Some(handle) => handle,
        None => return Ok(StatusCode::NOT_FOUND.into_response()),
    };
    let job = handle.read().await.clone();
    if matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
        return Ok(StatusCode::CONFLICT.into_response());
    }
    Ok(Json(job).into_response())
}
