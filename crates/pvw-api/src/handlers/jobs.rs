//! Job status HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use pvw_core::{JobListFilter, JobRepository, JobStatus, OperationType, ProcessingJob, ServerEvent};

use super::Pagination;
use crate::{ApiError, AppState};

/// Query parameters for listing jobs.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub operation_type: Option<String>,
    pub file_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListJobsQuery {
    fn into_filter(self) -> Result<JobListFilter, ApiError> {
        let status = self
            .status
            .map(|s| s.parse::<JobStatus>())
            .transpose()?;
        let operation_type = self
            .operation_type
            .map(|s| s.parse::<OperationType>())
            .transpose()?;
        let (limit, offset) = Pagination {
            limit: self.limit,
            offset: self.offset,
        }
        .resolve();
        Ok(JobListFilter {
            status,
            operation_type,
            file_id: self.file_id,
            limit,
            offset,
        })
    }
}

/// List jobs, newest first.
///
/// # Query Parameters
/// - `status`, `operation_type`, `file_id`: optional filters
/// - `limit`, `offset`: pagination
///
/// # Returns
/// - 200 OK with the matching jobs
/// - 400 Bad Request for an unknown status or operation type
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<ProcessingJob>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.db.jobs.list(&filter).await?))
}

/// Get one job, including progress, result and error.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, ApiError> {
    state
        .db
        .jobs
        .get(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}

/// Cancel a queued or processing job.
///
/// # Returns
/// - 200 OK with the cancelled job
/// - 404 Not Found if the job doesn't exist
/// - 409 Conflict if the job already finished
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, ApiError> {
    let job = state.db.jobs.cancel(job_id).await?;
    state.event_bus.emit(ServerEvent::JobCancelled {
        job_id,
        file_id: job.file_id,
    });
    tracing::info!(subsystem = "api", %job_id, "Job cancelled");
    Ok(Json(job))
}
