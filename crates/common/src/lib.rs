//! CQI-9 Portal Common Library
//!
//! Shared code for the portal crates including:
//! - Configuration management
//! - Error types and handling
//! - Database models and repository
//! - CQI-9 knowledge store
//! - LLM client abstraction
//! - Compliance analysis
//! - Metrics and observability

pub mod analysis;
pub mod config;
pub mod db;
pub mod errors;
pub mod knowledge;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use analysis::{ComplianceAnalyzer, ComplianceVerdict};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use knowledge::{FormType, KnowledgeStore};
pub use llm::LlmClient;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
