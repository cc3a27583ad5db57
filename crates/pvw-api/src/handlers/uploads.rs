//! Upload HTTP handlers: accept files, list and delete them, and queue
//! processing jobs against them.

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use pvw_core::{
    FileRepository, FileStatus, JobRepository, OperationType, ServerEvent, UploadedFile,
};

use super::Pagination;
use crate::services::uploads::{remove_upload, store_upload};
use crate::{ApiError, AppState};

/// Upload a file.
///
/// Multipart fields:
/// - `file`: the file contents (required)
/// - `uploader`: free-form uploader name (optional)
///
/// # Returns
/// - 201 Created with the stored file record
/// - 400 Bad Request for a missing file, disallowed extension, empty or
///   oversized content
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedFile>), ApiError> {
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut uploader: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                data = Some(bytes.to_vec());
            }
            Some("uploader") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid uploader field: {}", e)))?;
                uploader = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let file = store_upload(
        &state.db.files,
        &state.uploads,
        filename.as_deref(),
        uploader,
        &data,
    )
    .await?;

    state.event_bus.emit(ServerEvent::FileUploaded {
        file_id: file.id,
        filename: file.filename.clone(),
        size_bytes: file.size_bytes,
    });

    Ok((StatusCode::CREATED, Json(file)))
}

/// List uploaded files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<UploadedFile>>, ApiError> {
    let (limit, offset) = page.resolve();
    Ok(Json(state.db.files.list(limit, offset).await?))
}

async fn load_file(state: &AppState, file_id: Uuid) -> Result<UploadedFile, ApiError> {
    match state.db.files.get(file_id).await? {
        Some(file) if file.status != FileStatus::Deleted => Ok(file),
        _ => Err(ApiError::NotFound(format!("File {} not found", file_id))),
    }
}

/// Get one file record.
///
/// # Returns
/// - 200 OK with the file record
/// - 404 Not Found if the file doesn't exist or was deleted
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<UploadedFile>, ApiError> {
    Ok(Json(load_file(&state, file_id).await?))
}

/// Delete a file from disk and mark its record deleted.
///
/// # Returns
/// - 204 No Content
/// - 404 Not Found if the file doesn't exist or was already deleted
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let file = load_file(&state, file_id).await?;
    remove_upload(FsPath::new(&file.stored_path)).await?;
    if !state.db.files.mark_deleted(file_id).await? {
        return Err(ApiError::NotFound(format!("File {} not found", file_id)));
    }
    tracing::info!(subsystem = "api", %file_id, "File deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for queuing a processing job.
#[derive(Debug, Deserialize)]
pub struct ProcessFileRequest {
    pub operation_type: String,
    #[serde(default)]
    pub options: Option<JsonValue>,
}

/// Queue a processing job for a file.
///
/// # Returns
/// - 202 Accepted with `{job_id, file_id, operation_type, queue, status}`
/// - 400 Bad Request for an unknown operation type or non-object options
/// - 404 Not Found if the file doesn't exist or was deleted
pub async fn process_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(body): Json<ProcessFileRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let operation_type: OperationType = body.operation_type.parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "Unknown operation type '{}'. Expected one of: {}",
            body.operation_type,
            OperationType::ALL
                .iter()
                .map(|o| o.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    if let Some(options) = &body.options {
        if !options.is_object() && !options.is_null() {
            return Err(ApiError::BadRequest(
                "options must be a JSON object".to_string(),
            ));
        }
    }

    let options = body.options.filter(|o| !o.is_null());
    let job = state.db.jobs.queue(file_id, operation_type, options).await?;

    state.event_bus.emit(ServerEvent::JobQueued {
        job_id: job.id,
        file_id,
        operation_type,
        queue: job.queue,
    });
    tracing::info!(
        subsystem = "api",
        job_id = %job.id,
        %file_id,
        %operation_type,
        queue = %job.queue,
        "Job queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job_id": job.id,
            "file_id": file_id,
            "operation_type": operation_type,
            "queue": job.queue,
            "status": job.status,
        })),
    ))
}
