//! Health and system status handlers.

use axum::{extract::State, response::IntoResponse, Json};

use pvw_core::{JobRepository, QueueStats};

use crate::ws::WsStats;
use crate::{ApiError, AppState};

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Job counts per status.
pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.db.jobs.queue_stats().await?))
}

/// Open WebSocket connections and subscribers per topic.
pub async fn websocket_status(State(state): State<AppState>) -> Json<WsStats> {
    Json(state.ws.stats().await)
}
