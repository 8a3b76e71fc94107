//! Job status handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use cqi9_common::{
    db::models::{DocumentJob, JobStatus},
    errors::{AppError, Result},
};

/// Job status response
#[derive(Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub filename: String,
    pub status: String,
    pub file_extension: String,
    pub content_sha256: String,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    pub text_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl JobResponse {
    fn from_job(job: DocumentJob, assessment_id: Option<Uuid>) -> Self {
        Self {
            job_id: job.id,
            text_length: job.text().map(str::len).unwrap_or(0),
            filename: job.original_filename,
            status: job.status,
            file_extension: job.file_extension,
            content_sha256: job.content_sha256,
            size_bytes: job.size_bytes,
            extraction_source: job.extraction_source,
            form_type: job.form_type,
            structured_data: job.structured_data,
            assessment_id,
            error_message: job.error_message,
            started_at: job.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

/// Extracted text of a job
#[derive(Serialize)]
pub struct RawTextResponse {
    pub job_id: Uuid,
    pub filename: String,
    pub text: String,
}

/// A processed document in the history list
#[derive(Serialize)]
pub struct PreviousEntry {
    pub job_id: Uuid,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    pub created_at: String,
    pub query_url: String,
}

/// Get job status
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>> {
    let job = state.repository.get_job(job_id).await?;
    let assessment_id = state
        .repository
        .find_assessment_by_job(job_id)
        .await?
        .map(|a| a.id);

    Ok(Json(JobResponse::from_job(job, assessment_id)))
}

/// Get the text extracted from a job's document
pub async fn raw_text(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<RawTextResponse>> {
    let job = state.repository.get_job(job_id).await?;
    let text = job
        .text()
        .ok_or_else(|| AppError::NotFound {
            resource_type: "Extracted text".to_string(),
            id: job_id.to_string(),
        })?
        .to_string();

    Ok(Json(RawTextResponse {
        job_id: job.id,
        filename: job.original_filename,
        text,
    }))
}

/// Processed documents, newest first
pub async fn previous(State(state): State<AppState>) -> Result<Json<Vec<PreviousEntry>>> {
    let jobs = state.repository.list_jobs().await?;

    let entries = jobs
        .into_iter()
        .filter(|job| job.job_status() == JobStatus::Completed)
        .map(|job| PreviousEntry {
            query_url: format!("/query/{}", job.id),
            job_id: job.id,
            filename: job.original_filename,
            form_type: job.form_type,
            created_at: job.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(entries))
}
