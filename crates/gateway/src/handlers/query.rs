//! Document question handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use cqi9_common::errors::AppError;
use cqi9_ingestion::certificate::answer_query;

#[derive(Debug, Deserialize)]
pub struct QueryForm {
    #[serde(default)]
    pub query: String,
}

/// `{success: true, content}` or `{success: false, error}`
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn ok(content: String) -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { success: true, content: Some(content), error: None }))
    }

    fn failed(error: &AppError) -> (StatusCode, Json<Self>) {
        tracing::warn!(error = %error, "Document query failed");
        (
            error.status_code(),
            Json(Self { success: false, content: None, error: Some(error.user_message()) }),
        )
    }
}

/// Answer a question about a processed document
pub async fn query_document(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Form(form): Form<QueryForm>,
) -> (StatusCode, Json<QueryResponse>) {
    let question = form.query.trim();
    if question.is_empty() {
        return QueryResponse::failed(&AppError::validation("query", "No query provided"));
    }

    let job = match state.repository.get_job(job_id).await {
        Ok(job) => job,
        Err(e) => return QueryResponse::failed(&e),
    };
    let Some(text) = job.text() else {
        return QueryResponse::failed(&AppError::NotFound {
            resource_type: "Extracted text".to_string(),
            id: job_id.to_string(),
        });
    };

    tracing::info!(job_id = %job_id, question_len = question.len(), "Answering document query");

    let llm_config = &state.config.llm;
    match answer_query(
        state.llm().as_ref(),
        text,
        question,
        llm_config.query_temperature,
        llm_config.max_tokens,
    )
    .await
    {
        Ok(content) => QueryResponse::ok(content),
        Err(e) => QueryResponse::failed(&e),
    }
}
