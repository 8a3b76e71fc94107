//! Upload handler

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use cqi9_common::errors::{AppError, Result};

/// Response after an upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub assessment_id: Uuid,
    pub filename: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_source: Option<String>,
    pub requirements_found: usize,
    pub evidence_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub query_url: String,
    pub analyze_url: String,
    pub assessment_url: String,
}

fn multipart_error(state: &AppState, error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limit = state.config.server.max_upload_bytes;
        AppError::PayloadTooLarge { size: limit + 1, limit }
    } else {
        AppError::InvalidFormat { message: error.body_text() }
    }
}

/// Accept a single multipart `file` field, store and process it
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&state, e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(&state, e))?;
        file = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::validation("file", "No file part"))?;
    if filename.trim().is_empty() {
        return Err(AppError::validation("file", "No selected file"));
    }

    let outcome = state.intake.intake(&filename, &bytes).await?;
    let job = outcome.job;

    tracing::info!(
        job_id = %job.id,
        assessment_id = %outcome.assessment.id,
        status = %job.status,
        "Upload processed"
    );

    let (requirements_found, evidence_found) = outcome
        .parsed
        .as_ref()
        .map(|p| (p.audit.requirement_ids.len(), p.audit.evidence.len()))
        .unwrap_or((0, 0));

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id: job.id,
            assessment_id: outcome.assessment.id,
            filename: job.original_filename.clone(),
            status: job.status.clone(),
            form_type: job.form_type.clone(),
            extraction_source: job.extraction_source.clone(),
            requirements_found,
            evidence_found,
            error_message: job.error_message.clone(),
            query_url: format!("/query/{}", job.id),
            analyze_url: "/api/analyze".to_string(),
            assessment_url: format!("/audit/{}", outcome.assessment.id),
        }),
    ))
}
