//! Assessment (audit) handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use cqi9_common::{
    db::{
        models::{AnalysisResult, Assessment},
        NewAssessment,
    },
    errors::{AppError, Result},
};

/// Assessment summary for the audit list
#[derive(Serialize)]
pub struct AuditSummary {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub supplier: Option<String>,
    pub audit_date: Option<String>,
    pub auditor: Option<String>,
    pub status: String,
    pub evidenced_requirements: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Assessment> for AuditSummary {
    fn from(a: &Assessment) -> Self {
        Self {
            id: a.id,
            job_id: a.job_id,
            supplier: a.supplier.clone(),
            audit_date: a.audit_date.clone(),
            auditor: a.auditor.clone(),
            status: a.status.clone(),
            evidenced_requirements: a.evidenced_requirements().len(),
            created_at: a.created_at.to_rfc3339(),
            updated_at: a.updated_at.to_rfc3339(),
        }
    }
}

/// The verdict currently shown for a requirement
#[derive(Serialize)]
pub struct CurrentResult {
    pub requirement_id: String,
    pub compliant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<f64>,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub references: Vec<String>,
    pub analyzed_at: String,
}

impl From<AnalysisResult> for CurrentResult {
    fn from(r: AnalysisResult) -> Self {
        Self {
            recommendations: r.recommendation_list(),
            references: r.reference_list(),
            confidence_percent: r.confidence.map(|c| (c * 100.0).clamp(0.0, 100.0)),
            requirement_id: r.requirement_id,
            compliant: r.compliant,
            confidence: r.confidence,
            explanation: r.explanation,
            analyzed_at: r.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AuditDetail {
    #[serde(flatten)]
    pub summary: AuditSummary,
    pub evidence: BTreeMap<String, String>,
    pub metadata: serde_json::Value,
    pub results: BTreeMap<String, CurrentResult>,
    /// Verdicts recorded so far, including superseded ones
    pub analysis_count: usize,
}

/// Assessment fields sent by the audit editor
#[derive(Debug, Deserialize, Validate)]
pub struct SaveAuditRequest {
    /// Existing assessment to update; a new one is created when absent
    #[serde(default)]
    pub id: Option<Uuid>,

    #[serde(default)]
    pub job_id: Option<Uuid>,

    #[serde(default)]
    #[validate(length(max = 200))]
    pub supplier: Option<String>,

    #[serde(default)]
    #[validate(length(max = 50))]
    pub audit_date: Option<String>,

    #[serde(default)]
    #[validate(length(max = 200))]
    pub auditor: Option<String>,

    #[serde(default)]
    pub evidence: BTreeMap<String, String>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Serialize)]
pub struct SaveAuditResponse {
    pub success: bool,
    pub audit_id: Uuid,
    pub status: String,
}

/// All assessments, most recently touched first
pub async fn list_audits(State(state): State<AppState>) -> Result<Json<Vec<AuditSummary>>> {
    let assessments = state.repository.list_assessments().await?;
    Ok(Json(assessments.iter().map(AuditSummary::from).collect()))
}

/// One assessment with its current verdicts
pub async fn get_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditDetail>> {
    let assessment = state.repository.get_assessment(id).await?;
    let analysis_count = state.repository.analysis_history(id).await?.len();
    let results = state
        .repository
        .current_results(id)
        .await?
        .into_iter()
        .map(|(requirement_id, result)| (requirement_id, CurrentResult::from(result)))
        .collect();

    Ok(Json(AuditDetail {
        summary: AuditSummary::from(&assessment),
        evidence: assessment.evidence_map(),
        metadata: assessment.metadata.clone(),
        results,
        analysis_count,
    }))
}

/// Create or update an assessment
pub async fn save_audit(
    State(state): State<AppState>,
    Json(request): Json<SaveAuditRequest>,
) -> Result<Json<SaveAuditResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if let Some(job_id) = request.job_id {
        state.repository.get_job(job_id).await?;
    }

    let existing = match request.id {
        Some(id) => state.repository.find_assessment_by_id(id).await?,
        None => None,
    };

    let new = NewAssessment {
        id: request.id,
        job_id: request.job_id,
        supplier: request.supplier,
        audit_date: request.audit_date,
        auditor: request.auditor,
        evidence: request.evidence,
        metadata: request.metadata,
    };

    let assessment = match existing {
        Some(existing) => {
            state.repository.update_assessment(existing.id, new).await?;
            state.repository.refresh_assessment_status(existing.id).await?
        }
        None => state.repository.create_assessment(new).await?,
    };

    tracing::info!(audit_id = %assessment.id, status = %assessment.status, "Audit saved");

    Ok(Json(SaveAuditResponse {
        success: true,
        audit_id: assessment.id,
        status: assessment.status,
    }))
}

/// Delete an assessment and its verdicts
pub async fn delete_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.repository.delete_assessment(id).await? {
        return Err(AppError::AssessmentNotFound { id: id.to_string() });
    }

    tracing::info!(audit_id = %id, "Audit deleted");
    Ok(StatusCode::NO_CONTENT)
}
