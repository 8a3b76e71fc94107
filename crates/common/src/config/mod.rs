//! Configuration management for the CQI-9 portal
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Every section has defaults, so a bare environment still yields a
//! working local setup (SQLite database, mock LLM, local PDF extraction).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// OCR / document text service configuration
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Upload storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// CQI-9 knowledge dataset configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Compliance analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (sqlite:// or postgres://)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// LLM provider: openai (any chat-completions compatible API), mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Chat model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature for compliance verdicts
    #[serde(default = "default_analysis_temperature")]
    pub analysis_temperature: f32,

    /// Sampling temperature for free-form document questions
    #[serde(default = "default_query_temperature")]
    pub query_temperature: f32,

    /// Completion token limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    /// OCR provider: llmwhisperer, local
    #[serde(default = "default_ocr_provider")]
    pub provider: String,

    /// LLMWhisperer API key
    pub api_key: Option<String>,

    /// LLMWhisperer v2 base URL
    #[serde(default = "default_ocr_api_base")]
    pub api_base: String,

    /// Seconds between status polls
    #[serde(default = "default_ocr_poll_interval")]
    pub poll_interval_secs: u64,

    /// Give up on a document after this many seconds
    #[serde(default = "default_ocr_max_wait")]
    pub max_wait_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory uploads are written to, one subdirectory per job
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Accepted file extensions (lowercase, without the dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    /// Directory holding knowledge.json or the per-entity JSON/CSV files.
    /// The bundled dataset is used when nothing is found there.
    #[serde(default = "default_knowledge_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Upper bound of the random delay before each section analysis call
    #[serde(default = "default_stagger_max_ms")]
    pub stagger_max_ms: u64,

    /// Ask the LLM for structured certificate data after upload
    #[serde(default = "default_structured_extraction")]
    pub structured_extraction: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_request_timeout() -> u64 { 660 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_upload_bytes() -> usize { 16 * 1024 * 1024 }
fn default_database_url() -> String { "sqlite://data/cqi9.db?mode=rwc".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_api_base() -> String { "https://api.deepseek.com/v1".to_string() }
fn default_llm_model() -> String { "deepseek-chat".to_string() }
fn default_analysis_temperature() -> f32 { 0.1 }
fn default_query_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 4000 }
fn default_llm_timeout() -> u64 { 120 }
fn default_ocr_provider() -> String { "llmwhisperer".to_string() }
fn default_ocr_api_base() -> String { "https://llmwhisperer-api.us-central.unstract.com/api/v2".to_string() }
fn default_ocr_poll_interval() -> u64 { 5 }
fn default_ocr_max_wait() -> u64 { 600 }
fn default_ocr_timeout() -> u64 { 60 }
fn default_upload_dir() -> PathBuf { PathBuf::from("data/uploads") }
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "jpg", "jpeg", "png"].iter().map(|s| s.to_string()).collect()
}
fn default_knowledge_dir() -> PathBuf { PathBuf::from("data/knowledge") }
fn default_stagger_max_ms() -> u64 { 500 }
fn default_structured_extraction() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "cqi9-portal".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file, still honouring APP__ overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl LlmConfig {
    /// True when a real provider can be called
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OcrConfig {
    /// True when the remote OCR service should be used
    pub fn use_remote(&self) -> bool {
        self.provider == "llmwhisperer"
            && self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: default_llm_api_base(),
            model: default_llm_model(),
            analysis_temperature: default_analysis_temperature(),
            query_temperature: default_query_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_ocr_provider(),
            api_key: None,
            api_base: default_ocr_api_base(),
            poll_interval_secs: default_ocr_poll_interval(),
            max_wait_secs: default_ocr_max_wait(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self { data_dir: default_knowledge_dir() }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stagger_max_ms: default_stagger_max_ms(),
            structured_extraction: default_structured_extraction(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.analysis.stagger_max_ms, 500);
        assert_eq!(config.storage.allowed_extensions, vec!["pdf", "jpg", "jpeg", "png"]);
    }

    #[test]
    fn test_credentials_detection() {
        let mut llm = LlmConfig::default();
        assert!(!llm.has_credentials());
        llm.api_key = Some("   ".to_string());
        assert!(!llm.has_credentials());
        llm.api_key = Some("sk-test".to_string());
        assert!(llm.has_credentials());

        let mut ocr = OcrConfig::default();
        ocr.api_key = Some("key".to_string());
        assert!(ocr.use_remote());
        ocr.provider = "local".to_string();
        assert!(!ocr.use_remote());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 8088\n\n[analysis]\nstagger_max_ms = 0").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.analysis.stagger_max_ms, 0);
        assert_eq!(config.llm.api_base, "https://api.deepseek.com/v1");
        assert_eq!(config.ocr.poll_interval_secs, 5);
    }
}
