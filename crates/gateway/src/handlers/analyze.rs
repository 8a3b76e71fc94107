//! Requirement analysis handlers
//!
//! Both endpoints answer failures with `{explanation}` so the portal can
//! show the message in place of a verdict.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use cqi9_common::{
    analysis::{AnalysisRequest, Compliance, ComplianceVerdict, RequirementState, SectionReport},
    db::NewAnalysisResult,
    errors::AppError,
};

/// Error body of the analysis endpoints
#[derive(Debug)]
pub struct AnalysisFailure(pub AppError);

impl From<AppError> for AnalysisFailure {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ExplanationBody {
    explanation: String,
}

impl IntoResponse for AnalysisFailure {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if self.0.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Analysis request failed");
        } else {
            tracing::warn!(error = %self.0, status = status.as_u16(), "Analysis request rejected");
        }
        let body = ExplanationBody { explanation: self.0.user_message() };
        (status, Json(body)).into_response()
    }
}

type AnalysisResult<T> = std::result::Result<T, AnalysisFailure>;

/// JSON body whose rejections are answered with `{explanation}`
#[derive(Debug)]
pub struct AnalysisJson<T>(pub T);

impl<T, S> FromRequest<S> for AnalysisJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AnalysisFailure;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AnalysisFailure(AppError::InvalidFormat {
                message: rejection.body_text(),
            })),
        }
    }
}

fn validation_failure(e: validator::ValidationErrors) -> AnalysisFailure {
    AnalysisFailure(AppError::Validation { message: e.to_string(), field: None })
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[serde(default)]
    #[validate(length(max = 32))]
    pub requirement_id: String,

    /// Requirement text as displayed; resolved by id when absent
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub requirement: Option<String>,

    #[serde(default)]
    #[validate(length(max = 50000))]
    pub evidence: String,

    /// Persist the verdict on this assessment
    #[serde(default)]
    pub assessment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct VerdictResponse {
    pub requirement_id: String,
    pub compliant: bool,
    pub compliance: Compliance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<f64>,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_status: Option<String>,
}

impl From<ComplianceVerdict> for VerdictResponse {
    fn from(v: ComplianceVerdict) -> Self {
        Self {
            compliant: v.is_compliant(),
            confidence_percent: v.confidence_percent(),
            requirement_id: v.requirement_id,
            compliance: v.compliance,
            confidence: v.confidence,
            explanation: v.explanation,
            recommendations: v.recommendations,
            references: v.references,
            assessment_status: None,
        }
    }
}

/// Store evidence and verdict, then refresh the overall status
async fn persist_verdict(
    state: &AppState,
    assessment_id: Uuid,
    verdict: &ComplianceVerdict,
    evidence: &str,
) -> cqi9_common::Result<String> {
    let assessment = state
        .repository
        .record_verdict(NewAnalysisResult {
            assessment_id,
            requirement_id: verdict.requirement_id.clone(),
            compliant: verdict.is_compliant(),
            confidence: verdict.confidence,
            explanation: verdict.explanation.clone(),
            recommendations: verdict.recommendations.clone(),
            references: verdict.references.clone(),
            evidence: evidence.to_string(),
        })
        .await?;
    Ok(assessment.status)
}

/// Analyze one requirement against its evidence
pub async fn analyze(
    State(state): State<AppState>,
    AnalysisJson(request): AnalysisJson<AnalyzeRequest>,
) -> AnalysisResult<Json<VerdictResponse>> {
    request.validate().map_err(validation_failure)?;

    // Unknown assessments fail before the LLM is called
    if let Some(id) = request.assessment_id {
        state.repository.get_assessment(id).await?;
    }

    let mut analysis = AnalysisRequest::new(request.requirement_id.trim(), request.evidence.clone());
    analysis.requirement_text = request.requirement.clone();

    let verdict = state.analyzer.analyze(&analysis).await?;

    let assessment_status = match request.assessment_id {
        Some(id) => Some(persist_verdict(&state, id, &verdict, &request.evidence).await?),
        None => None,
    };

    let mut response = VerdictResponse::from(verdict);
    response.assessment_status = assessment_status;
    Ok(Json(response))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SectionRequest {
    #[serde(default)]
    pub assessment_id: Option<Uuid>,

    #[validate(length(max = 200))]
    pub items: Vec<AnalysisRequest>,
}

#[derive(Debug, Serialize)]
pub struct SectionResponse {
    pub states: BTreeMap<String, RequirementState>,
    pub skipped: Vec<String>,
    pub completed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_status: Option<String>,
    /// Verdicts that were computed but could not be stored
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub save_errors: BTreeMap<String, String>,
}

/// Outcome of storing a section's verdicts
#[derive(Debug, Default)]
struct SectionSave {
    assessment_status: Option<String>,
    errors: BTreeMap<String, String>,
}

/// Store every completed verdict; a failed save is reported per requirement
/// and does not stop the others
async fn persist_section(
    state: &AppState,
    assessment_id: Uuid,
    report: &SectionReport,
    evidence_by_id: &BTreeMap<String, String>,
) -> SectionSave {
    let mut save = SectionSave::default();
    for verdict in report.verdicts() {
        let evidence = evidence_by_id
            .get(&verdict.requirement_id)
            .map(String::as_str)
            .unwrap_or_default();
        match persist_verdict(state, assessment_id, verdict, evidence).await {
            Ok(status) => save.assessment_status = Some(status),
            Err(e) => {
                tracing::error!(
                    assessment_id = %assessment_id,
                    requirement_id = %verdict.requirement_id,
                    error = %e,
                    "Failed to store verdict"
                );
                save.errors.insert(verdict.requirement_id.clone(), e.user_message());
            }
        }
    }
    save
}

/// Analyze every populated requirement of a section concurrently
pub async fn analyze_section(
    State(state): State<AppState>,
    AnalysisJson(request): AnalysisJson<SectionRequest>,
) -> AnalysisResult<(StatusCode, Json<SectionResponse>)> {
    request.validate().map_err(validation_failure)?;

    if let Some(id) = request.assessment_id {
        state.repository.get_assessment(id).await?;
    }

    let evidence_by_id: BTreeMap<String, String> = request
        .items
        .iter()
        .map(|item| (item.requirement_id.trim().to_string(), item.evidence.clone()))
        .collect();

    let stagger = Duration::from_millis(state.config.analysis.stagger_max_ms);
    let report = state.analyzer.analyze_section(request.items, stagger).await?;

    let save = match request.assessment_id {
        Some(id) => persist_section(&state, id, &report, &evidence_by_id).await,
        None => SectionSave::default(),
    };

    let failed = report.failed_count();
    let completed = report.verdicts().count();
    tracing::info!(completed, failed, skipped = report.skipped.len(), "Section analyzed");

    Ok((
        StatusCode::OK,
        Json(SectionResponse {
            states: report.states,
            skipped: report.skipped,
            completed,
            failed,
            assessment_status: save.assessment_status,
            save_errors: save.errors,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use cqi9_common::{
        config::AppConfig,
        db::{DbPool, NewAssessment, Repository},
        knowledge::KnowledgeStore,
        llm::MockLlmClient,
    };
    use std::sync::Arc;

    async fn state() -> AppState {
        let config = AppConfig::default();
        let extractor = cqi9_ingestion::create_text_extractor(&config.ocr).unwrap();
        AppState::new(
            config,
            Repository::new(DbPool::in_memory().await.unwrap()),
            Arc::new(KnowledgeStore::bundled().unwrap()),
            Arc::new(MockLlmClient::new()),
            extractor,
        )
        .unwrap()
    }

    fn report(ids: &[&str]) -> SectionReport {
        let states = ids
            .iter()
            .map(|id| {
                let verdict = ComplianceVerdict {
                    requirement_id: id.to_string(),
                    compliance: Compliance::Compliant,
                    confidence: Some(0.9),
                    explanation: "Documented and current.".to_string(),
                    recommendations: vec![],
                    references: vec![],
                };
                (id.to_string(), RequirementState::Completed { verdict })
            })
            .collect();
        SectionReport { states, skipped: vec![] }
    }

    fn evidence(ids: &[&str]) -> BTreeMap<String, String> {
        ids.iter().map(|id| (id.to_string(), format!("records for {}", id))).collect()
    }

    #[tokio::test]
    async fn test_persist_section_stores_every_verdict() {
        let state = state().await;
        let assessment = state
            .repository
            .create_assessment(NewAssessment::default())
            .await
            .unwrap();
        let ids = ["1.1", "1.2", "1.3"];

        let save = persist_section(&state, assessment.id, &report(&ids), &evidence(&ids)).await;
        assert!(save.errors.is_empty());
        assert_eq!(save.assessment_status.as_deref(), Some("compliant"));

        let stored = state.repository.get_assessment(assessment.id).await.unwrap();
        assert_eq!(stored.evidence_map()["1.2"], "records for 1.2");
        assert_eq!(state.repository.analysis_history(assessment.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_persist_section_reports_each_failed_save() {
        let state = state().await;
        let ids = ["1.1", "1.2"];

        let save = persist_section(&state, Uuid::new_v4(), &report(&ids), &evidence(&ids)).await;
        assert_eq!(save.assessment_status, None);
        assert_eq!(save.errors.len(), 2);
        assert!(save.errors["1.1"].contains("Assessment not found"));
    }

    #[tokio::test]
    async fn test_malformed_body_becomes_explanation() {
        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"requirement_id":"1.1","evidence":5}"#))
            .unwrap();

        let failure = AnalysisJson::<AnalyzeRequest>::from_request(request, &())
            .await
            .unwrap_err();
        assert!(matches!(failure.0, AppError::InvalidFormat { .. }));
        assert_eq!(failure.0.status_code(), StatusCode::BAD_REQUEST);
        assert!(failure.0.user_message().contains("evidence"));
    }
}
