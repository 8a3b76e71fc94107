//! CQI-9 Portal Gateway
//!
//! The JSON API in front of intake and analysis.
//! Handles:
//! - Upload and document processing
//! - Requirement and section analysis
//! - Assessment storage
//! - Observability (logging, metrics, tracing)

pub mod cli;
pub mod handlers;
pub mod middleware;
pub mod telemetry;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use cqi9_common::{
    analysis::{AnalyzerOptions, ComplianceAnalyzer},
    config::AppConfig,
    db::{DbPool, Repository},
    errors::Result,
    knowledge::KnowledgeStore,
    llm::{create_llm_client, LlmClient},
};
use cqi9_ingestion::{create_text_extractor, FormParser, IntakeProcessor, TextExtractor, UploadStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repository: Repository,
    pub knowledge: Arc<KnowledgeStore>,
    pub analyzer: ComplianceAnalyzer,
    pub intake: Arc<IntakeProcessor>,
}

impl AppState {
    /// Wire the services from already constructed parts
    pub fn new(
        config: AppConfig,
        repository: Repository,
        knowledge: Arc<KnowledgeStore>,
        llm: Arc<dyn LlmClient>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let analyzer = ComplianceAnalyzer::new(
            llm.clone(),
            knowledge.clone(),
            AnalyzerOptions::from(&config.llm),
        );

        let store = UploadStore::from_config(&config.storage, config.server.max_upload_bytes);
        let parser = Arc::new(FormParser::new()?);
        let mut intake = IntakeProcessor::new(repository.clone(), store, extractor, parser);
        if config.analysis.structured_extraction {
            intake = intake.with_structured_extraction(llm, config.llm.analysis_temperature);
        }

        Ok(Self {
            config: Arc::new(config),
            repository,
            knowledge,
            analyzer,
            intake: Arc::new(intake),
        })
    }

    /// Connect to the database and external services named in the config
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let pool = DbPool::new(&config.database).await?;
        pool.migrate().await?;

        let knowledge = Arc::new(KnowledgeStore::load(&config.knowledge)?);
        let llm = create_llm_client(&config.llm)?;
        let extractor = create_text_extractor(&config.ocr)?;

        Self::new(config, Repository::new(pool), knowledge, llm, extractor)
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        self.analyzer.llm()
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes + MULTIPART_OVERHEAD_BYTES);
    let request_timeout = state.config.request_timeout();

    let timed = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/api-status", get(handlers::health::api_status))

        // Intake endpoints
        .route("/upload", post(handlers::upload::upload))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/raw-text/{id}", get(handlers::jobs::raw_text))
        .route("/previous", get(handlers::jobs::previous))
        .route("/query/{id}", post(handlers::query::query_document))

        // Assessment endpoints
        .route("/audits", get(handlers::assessments::list_audits))
        .route("/audit/save", post(handlers::assessments::save_audit))
        .route(
            "/audit/{id}",
            get(handlers::assessments::get_audit).delete(handlers::assessments::delete_audit),
        )

        // Knowledge endpoints
        .route("/api/requirements", get(handlers::knowledge::list_requirements))
        .route("/api/requirements/{id}", get(handlers::knowledge::get_requirement))

        // Request timeout
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout));

    // Analysis calls are bounded by the LLM client timeout and always
    // answer with `{explanation}`
    let analysis = Router::new()
        .route("/api/analyze", post(handlers::analyze::analyze))
        .route("/api/analyze/section", post(handlers::analyze::analyze_section));

    timed
        .merge(analysis)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(body_limit)
        .layer(
            ServiceBuilder::new()
                // Request ID (outermost so every log line carries it)
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
