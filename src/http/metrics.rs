//! `GET /metrics` and `GET /metrics/ws` (§6, C12): JSON state snapshot plus
//! a websocket that pushes the same snapshot at >= 1 Hz.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::metrics::StateSnapshot;

use super::state::AppState;

pub async fn snapshot(State(state): State<Arc<AppState>>) -> Json<StateSnapshot> {
    let perf = state.performance.get_performance_stats().await;
    Json(StateSnapshot::build(state.started_at.elapsed(), &perf))
}

pub async fn prometheus_text(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(exporter) => exporter.render().into_response(),
        None => String::new().into_response(),
    }
}

pub async fn metrics_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_snapshots(socket, state))
}

async fn stream_snapshots(mut socket: WebSocket, state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(900));
    loop {
        ticker.tick().await;
        let perf = state.performance.get_performance_stats().await;
        let snapshot = StateSnapshot::build(state.started_at.elapsed(), &perf);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(error = %err, "failed to serialize metrics snapshot");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}
