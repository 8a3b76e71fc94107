//! Document text extraction
//!
//! Two providers behind one trait:
//! - LLMWhisperer v2 (remote OCR with layout preservation)
//! - Local PDF text extraction with lopdf

use crate::errors::IngestionError;
use crate::pdf::extract_text_from_pdf;
use async_trait::async_trait;
use cqi9_common::config::OcrConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where extracted text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Ocr,
    LocalPdf,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionSource::Ocr => "ocr",
            ExtractionSource::LocalPdf => "local_pdf",
        }
    }
}

/// Text extracted from one document
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedText {
    pub text: String,
    pub source: ExtractionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    pub duration_ms: u64,
}

/// Trait for turning a stored upload into text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of the file at `path`; `extension` is lowercase
    async fn extract(&self, path: &Path, extension: &str) -> Result<ExtractedText, IngestionError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

fn is_scanned_image(extension: &str) -> bool {
    matches!(extension, "jpg" | "jpeg" | "png" | "tif" | "tiff")
}

/// Query parameters for a whisper request, tuned per file type
pub fn whisper_params(extension: &str) -> Vec<(&'static str, &'static str)> {
    let mut params = vec![
        ("mode", "form"),
        ("output_mode", "layout_preserving"),
        ("add_line_nos", "true"),
    ];
    if is_scanned_image(extension) {
        params.extend([
            ("median_filter_size", "3"),
            ("gaussian_blur_radius", "1"),
            ("line_splitter_tolerance", "0.5"),
        ]);
    }
    if is_scanned_image(extension) || extension == "pdf" {
        params.extend([("mark_vertical_lines", "true"), ("mark_horizontal_lines", "true")]);
    }
    params
}

/// LLMWhisperer v2 client: submit, poll status, retrieve text
pub struct WhispererClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_wait: Duration,
}

#[derive(Deserialize)]
struct SubmitResponse {
    whisper_hash: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl WhispererClient {
    pub fn new(config: &OcrConfig, api_key: String) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestionError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        })
    }

    async fn submit(&self, bytes: Vec<u8>, extension: &str) -> Result<String, IngestionError> {
        let response = self
            .client
            .post(format!("{}/whisper", self.base_url))
            .query(&whisper_params(extension))
            .header("unstract-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| IngestionError::Ocr(format!("OCR request failed: {}", e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestionError::Ocr(format!("API error: {} - {}", status.as_u16(), body)));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| IngestionError::Ocr(format!("Invalid whisper response: {}", e)))?;
        Ok(submitted.whisper_hash)
    }

    async fn wait_until_processed(&self, hash: &str) -> Result<(), IngestionError> {
        let start = Instant::now();
        loop {
            let response = self
                .client
                .get(format!("{}/whisper-status", self.base_url))
                .query(&[("whisper_hash", hash)])
                .header("unstract-key", &self.api_key)
                .send()
                .await
                .map_err(|e| IngestionError::Ocr(format!("Status check failed: {}", e)))?;

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(IngestionError::Ocr(format!("Status check failed: {}", body)));
            }

            let status: StatusResponse = response
                .json()
                .await
                .map_err(|e| IngestionError::Ocr(format!("Invalid status response: {}", e)))?;

            match status.status.as_str() {
                "processed" => return Ok(()),
                "unknown" | "error" => {
                    return Err(IngestionError::Ocr(format!(
                        "Error during extraction: {}",
                        status.message.unwrap_or(status.status)
                    )));
                }
                other => tracing::debug!(whisper_hash = hash, status = other, "Whisper job still running"),
            }

            if start.elapsed() + self.poll_interval > self.max_wait {
                return Err(IngestionError::OcrTimeout { seconds: self.max_wait.as_secs() });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn retrieve(&self, hash: &str) -> Result<String, IngestionError> {
        let response = self
            .client
            .get(format!("{}/whisper-retrieve", self.base_url))
            .query(&[("whisper_hash", hash), ("text_only", "true")])
            .header("unstract-key", &self.api_key)
            .send()
            .await
            .map_err(|e| IngestionError::Ocr(format!("Text retrieval failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestionError::Ocr(format!("Text retrieval failed: {}", body)));
        }

        response
            .text()
            .await
            .map_err(|e| IngestionError::Ocr(format!("Text retrieval failed: {}", e)))
    }
}

#[async_trait]
impl TextExtractor for WhispererClient {
    async fn extract(&self, path: &Path, extension: &str) -> Result<ExtractedText, IngestionError> {
        let start = Instant::now();
        let bytes = tokio::fs::read(path).await?;

        let hash = self.submit(bytes, extension).await?;
        tracing::info!(whisper_hash = %hash, extension, "Whisper job submitted");

        self.wait_until_processed(&hash).await?;
        let text = self.retrieve(&hash).await?;

        if text.trim().is_empty() {
            return Err(IngestionError::EmptyDocument(path.display().to_string()));
        }

        Ok(ExtractedText {
            text,
            source: ExtractionSource::Ocr,
            pages: None,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "llmwhisperer"
    }
}

/// Text layer of PDFs, no OCR
pub struct LocalPdfExtractor;

#[async_trait]
impl TextExtractor for LocalPdfExtractor {
    async fn extract(&self, path: &Path, extension: &str) -> Result<ExtractedText, IngestionError> {
        if extension != "pdf" {
            return Err(IngestionError::UnsupportedFileType {
                extension: extension.to_string(),
            });
        }
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(IngestionError::FileNotFound(path.display().to_string()));
        }

        let start = Instant::now();
        let owned = path.to_path_buf();
        let pdf = tokio::task::spawn_blocking(move || extract_text_from_pdf(&owned))
            .await
            .map_err(|e| IngestionError::PdfParseError {
                path: path.display().to_string(),
                message: format!("Extraction task failed: {}", e),
            })??;

        Ok(ExtractedText {
            text: pdf.text,
            source: ExtractionSource::LocalPdf,
            pages: Some(pdf.pages),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "local_pdf"
    }
}

/// Create a text extractor based on configuration.
///
/// LLMWhisperer without an API key degrades to local PDF extraction.
pub fn create_text_extractor(config: &OcrConfig) -> Result<Arc<dyn TextExtractor>, IngestionError> {
    if config.use_remote() {
        let key = config.api_key.clone().unwrap_or_default();
        tracing::info!(base = %config.api_base, "Using LLMWhisperer OCR");
        return Ok(Arc::new(WhispererClient::new(config, key)?));
    }
    if config.provider == "llmwhisperer" {
        tracing::warn!("OCR API key not configured, using local PDF text extraction");
    }
    Ok(Arc::new(LocalPdfExtractor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn stub_server(status: &'static str) -> String {
        let app = Router::new()
            .route(
                "/whisper",
                post(|headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                    if headers.get("unstract-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
                        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"message": "bad key"})));
                    }
                    assert_eq!(params.get("mode").map(String::as_str), Some("form"));
                    (StatusCode::ACCEPTED, Json(serde_json::json!({"whisper_hash": "abc123"})))
                }),
            )
            .route(
                "/whisper-status",
                get(move || async move { Json(serde_json::json!({ "status": status })) }),
            )
            .route(
                "/whisper-retrieve",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    assert_eq!(params.get("text_only").map(String::as_str), Some("true"));
                    "Temperature Uniformity Survey\nFurnace ID: F-12".to_string()
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base: String) -> OcrConfig {
        OcrConfig {
            api_key: Some("test-key".into()),
            api_base: base,
            poll_interval_secs: 0,
            max_wait_secs: 1,
            ..OcrConfig::default()
        }
    }

    fn sample_file() -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        std::fs::write(file.path(), b"%PDF-1.4 stub").unwrap();
        file
    }

    #[test]
    fn test_params_per_file_type() {
        let pdf = whisper_params("pdf");
        assert!(pdf.contains(&("mark_vertical_lines", "true")));
        assert!(!pdf.iter().any(|(k, _)| *k == "median_filter_size"));

        let scan = whisper_params("jpg");
        assert!(scan.contains(&("median_filter_size", "3")));
        assert!(scan.contains(&("mark_horizontal_lines", "true")));
    }

    #[tokio::test]
    async fn test_whisper_round_trip() {
        let base = stub_server("processed").await;
        let client = WhispererClient::new(&config(base), "test-key".into()).unwrap();
        let file = sample_file();

        let extracted = client.extract(file.path(), "pdf").await.unwrap();
        assert_eq!(extracted.source, ExtractionSource::Ocr);
        assert!(extracted.text.contains("Furnace ID: F-12"));
    }

    #[tokio::test]
    async fn test_whisper_error_status() {
        let base = stub_server("error").await;
        let client = WhispererClient::new(&config(base), "test-key".into()).unwrap();
        let file = sample_file();

        let err = client.extract(file.path(), "pdf").await.unwrap_err();
        assert!(matches!(err, IngestionError::Ocr(ref m) if m.starts_with("Error during extraction")));
    }

    #[tokio::test]
    async fn test_whisper_rejected_key() {
        let base = stub_server("processed").await;
        let client = WhispererClient::new(&config(base), "wrong".into()).unwrap();
        let file = sample_file();

        let err = client.extract(file.path(), "pdf").await.unwrap_err();
        assert!(matches!(err, IngestionError::Ocr(ref m) if m.starts_with("API error: 401")));
    }

    #[tokio::test]
    async fn test_local_extractor_rejects_images() {
        let err = LocalPdfExtractor.extract(Path::new("scan.png"), "png").await.unwrap_err();
        assert!(matches!(err, IngestionError::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_factory_without_key_is_local() {
        let extractor = create_text_extractor(&OcrConfig::default()).unwrap();
        assert_eq!(extractor.name(), "local_pdf");
    }
}
