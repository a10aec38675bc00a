//! `POST /screenshot` (§6): the single-capture boundary. Validates the body,
//! consults the result cache, then drives C7 (admission) and C6 (capture)
//! the same way [`crate::batch::Scheduler`] drives them for batch items.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureRequest;
use crate::config::OutputFormat;
use crate::error::ApiError;
use crate::result_cache::{CachedResult, ResultCache};

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScreenshotBody {
    pub url: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    #[serde(default)]
    pub cache: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotResponse {
    pub url: String,
}

pub async fn take_screenshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheQuery>,
    Json(body): Json<ScreenshotBody>,
) -> Result<Json<ScreenshotResponse>, ApiError> {
    if !(1..=4096).contains(&body.width) || !(1..=4096).contains(&body.height) {
        return Err(ApiError::Validation(
            "width and height must be in 1..=4096".to_string(),
        ));
    }
    if crate::utils::validate_url(&body.url).is_err() {
        return Err(ApiError::Validation("invalid url".to_string()));
    }

    let bypass = query.cache == Some(false);
    let cache_key = ResultCache::key(&body.url, body.width, body.height, body.format);
    if let Some(hit) = state.result_cache.get(&cache_key, bypass) {
        return Ok(Json(ScreenshotResponse {
            url: hit.artifact_url,
        }));
    }

    let _guard = state.admission.admit().await?;
    let pool_utilization = state.admission.utilization();
    let result = state
        .capture
        .capture(
            CaptureRequest {
                url: body.url.clone(),
                width: body.width,
                height: body.height,
                format: body.format,
                deadline: Duration::from_secs(30),
            },
            pool_utilization,
        )
        .await;
    state.admission.record_outcome(result.is_ok());

    let output = result.map_err(|err| {
        state.metrics.record_error(ApiError::from_capture(&err).kind());
        ApiError::from_capture(&err)
    })?;

    let content_type = content_type_for(body.format);
    let artifact_url = state
        .artifact_store
        .put(&output.bytes, &content_type)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    state.result_cache.put(
        &body.url,
        cache_key,
        CachedResult {
            artifact_url: artifact_url.clone(),
            content_type,
            byte_size: output.bytes.len() as u64,
        },
    );

    Ok(Json(ScreenshotResponse { url: artifact_url }))
}

fn content_type_for(format: OutputFormat) -> String {
    match format {
        OutputFormat::Png => "image/png",
        OutputFormat::Jpeg => "image/jpeg",
        OutputFormat::Webp => "image/webp",
    }
    .to_string()
}
