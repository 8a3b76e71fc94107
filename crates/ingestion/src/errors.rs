//! Intake and extraction error types

use cqi9_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("Unsupported file type: {extension}")]
    UnsupportedFileType { extension: String },

    #[error("File too large: {size} bytes exceeds {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("No text could be extracted from {0}")]
    EmptyDocument(String),

    #[error("{0}")]
    Ocr(String),

    #[error("Extraction timeout exceeded after {seconds}s")]
    OcrTimeout { seconds: u64 },

    #[error("Structured extraction failed: {0}")]
    StructuredExtraction(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::UnsupportedFileType { extension } => {
                AppError::UnsupportedFileType { extension }
            }
            IngestionError::FileTooLarge { size, limit } => AppError::PayloadTooLarge { size, limit },
            IngestionError::Ocr(message) => AppError::OcrError { message },
            e @ IngestionError::OcrTimeout { .. } => AppError::OcrError { message: e.to_string() },
            e @ (IngestionError::PdfParseError { .. }
            | IngestionError::EmptyDocument(_)
            | IngestionError::StructuredExtraction(_)) => {
                AppError::ExtractionFailed { message: e.to_string() }
            }
            IngestionError::ConfigError(message) => AppError::Configuration { message },
            IngestionError::FileNotFound(path) => AppError::NotFound {
                resource_type: "File".to_string(),
                id: path,
            },
            IngestionError::IoError(e) => AppError::Internal {
                message: format!("IO error: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_conversion_keeps_status_and_message() {
        let err: AppError = IngestionError::UnsupportedFileType { extension: "exe".into() }.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: AppError = IngestionError::Ocr("Invalid API key".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.user_message(), "Invalid API key");

        let err: AppError = IngestionError::EmptyDocument("scan.pdf".into()).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
