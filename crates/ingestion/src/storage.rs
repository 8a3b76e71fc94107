//! Upload storage
//!
//! Validates incoming files and writes them under
//! `<upload_dir>/<job_id>/<sanitized filename>`.

use crate::errors::IngestionError;
use cqi9_common::config::StorageConfig;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// A file written to the upload directory
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub filename: String,
    /// Lowercase extension without the dot
    pub extension: String,
    pub sha256: String,
    pub size: usize,
}

/// Upload directory with its acceptance rules
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, allowed_extensions: &[String], max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_bytes,
        }
    }

    pub fn from_config(config: &StorageConfig, max_bytes: usize) -> Self {
        Self::new(config.upload_dir.clone(), &config.allowed_extensions, max_bytes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Lowercase extension of `filename` if it is on the allow list
    pub fn check_extension(&self, filename: &str) -> Result<String, IngestionError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(IngestionError::UnsupportedFileType { extension });
        }
        Ok(extension)
    }

    /// Validate and write an upload for a new job
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<StoredUpload, IngestionError> {
        if bytes.len() > self.max_bytes {
            return Err(IngestionError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        let extension = self.check_extension(filename)?;
        let filename = sanitize_filename(filename);

        let job_id = Uuid::new_v4();
        let dir = self.root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        let sha256 = hex::encode(Sha256::digest(bytes));
        debug!(path = %path.display(), sha256 = %sha256, "Upload written");
        info!(job_id = %job_id, filename = %filename, size = bytes.len(), "Stored upload");

        Ok(StoredUpload {
            job_id,
            path,
            filename,
            extension,
            sha256,
            size: bytes.len(),
        })
    }
}

/// Keep the base name only, replacing anything outside `[A-Za-z0-9._-]`
/// with `_`. Leading dots are dropped so the result is never hidden.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
