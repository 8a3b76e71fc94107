//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub knowledge: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// LLM reachability as shown by the portal's status indicator
#[derive(Serialize)]
pub struct ApiStatusResponse {
    pub status: bool,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: cqi9_common::VERSION,
    })
}

/// Readiness probe - checks all dependencies
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = std::time::Instant::now();

    let db_check = match state.repository.ping().await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let knowledge_check = if state.knowledge.requirements().is_empty() {
        CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some("No requirements loaded".to_string()),
        }
    } else {
        CheckResult { status: "up".to_string(), latency_ms: None, error: None }
    };

    let all_healthy = db_check.status == "up" && knowledge_check.status == "up";
    let code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                database: db_check,
                knowledge: knowledge_check,
            },
        }),
    )
}

/// True only when a real LLM is configured and answers a minimal completion
pub async fn api_status(State(state): State<AppState>) -> Json<ApiStatusResponse> {
    let status = state.llm().health_check().await;
    tracing::debug!(status, model = state.llm().model_name(), "LLM status checked");
    Json(ApiStatusResponse { status })
}
