//! Scanning HTTP handlers backed by the local scan table.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use pvw_core::{CreateScanRequest, Scan, ScanRepository, ServerEvent};

use super::Pagination;
use crate::{ApiError, AppState};

fn scan_not_found(scan_id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Scan {} not found", scan_id))
}

/// Create a scan definition.
///
/// # Returns
/// - 201 Created with the scan
/// - 400 Bad Request if `name` or `data_source` is blank
pub async fn create_scan(
    State(state): State<AppState>,
    Json(req): Json<CreateScanRequest>,
) -> Result<(StatusCode, Json<Scan>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if req.data_source.trim().is_empty() {
        return Err(ApiError::BadRequest("data_source is required".to_string()));
    }

    let scan = state.db.scans.create(req).await?;
    state.event_bus.emit(ServerEvent::ScanCreated {
        scan_id: scan.id,
        name: scan.name.clone(),
    });
    Ok((StatusCode::CREATED, Json(scan)))
}

pub async fn list_scans(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Scan>>, ApiError> {
    let (limit, offset) = page.resolve();
    Ok(Json(state.db.scans.list(limit, offset).await?))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<Scan>, ApiError> {
    state
        .db
        .scans
        .get(scan_id)
        .await?
        .map(Json)
        .ok_or_else(|| scan_not_found(scan_id))
}

/// Start a scan.
///
/// # Returns
/// - 200 OK with the running scan
/// - 404 Not Found if the scan doesn't exist
/// - 409 Conflict if it is already running
pub async fn start_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<Scan>, ApiError> {
    let scan = state.db.scans.start(scan_id).await?;
    state.event_bus.emit(ServerEvent::ScanStarted { scan_id });
    Ok(Json(scan))
}

/// Stop a running scan.
///
/// # Returns
/// - 200 OK with the stopped scan
/// - 404 Not Found if the scan doesn't exist
/// - 409 Conflict if it is not running
pub async fn stop_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<Scan>, ApiError> {
    let scan = state.db.scans.stop(scan_id).await?;
    state.event_bus.emit(ServerEvent::ScanStopped { scan_id });
    Ok(Json(scan))
}

/// Status summary of a scan.
pub async fn scan_status(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let scan = state
        .db
        .scans
        .get(scan_id)
        .await?
        .ok_or_else(|| scan_not_found(scan_id))?;
    Ok(Json(serde_json::json!({
        "scan_id": scan.id,
        "status": scan.status,
        "started_at": scan.started_at,
        "stopped_at": scan.stopped_at,
    })))
}
