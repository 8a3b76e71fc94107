//! Intake processor
//!
//! Core logic for an upload: store the file, extract its text, recognize
//! the CQI-9 form and seed the assessment with what was found.

use crate::certificate::{assess_completeness, extract_certificate_data};
use crate::errors::IngestionError;
use crate::forms::{FormParser, ParsedDocument};
use crate::ocr::{ExtractedText, TextExtractor};
use crate::storage::{StoredUpload, UploadStore};
use cqi9_common::db::models::{Assessment, DocumentJob};
use cqi9_common::db::{NewAssessment, NewDocumentJob, Repository};
use cqi9_common::errors::Result;
use cqi9_common::llm::LlmClient;
use cqi9_common::metrics;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Text and form content of one document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentExtraction {
    pub extraction: ExtractedText,
    pub parsed: ParsedDocument,
}

/// Extract and parse a document without touching the database
pub async fn extract_document(
    extractor: &dyn TextExtractor,
    parser: &FormParser,
    path: &Path,
) -> std::result::Result<DocumentExtraction, IngestionError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let start = Instant::now();
    let result = extractor.extract(path, &extension).await;
    metrics::record_extraction(start.elapsed().as_secs_f64(), extractor.name(), result.is_ok());
    let extraction = result?;

    let parsed = parser.parse(&extraction.text);
    Ok(DocumentExtraction { extraction, parsed })
}

/// Result of an upload
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub job: DocumentJob,
    pub assessment: Assessment,
    /// None when extraction failed
    pub parsed: Option<ParsedDocument>,
}

/// Stores uploads and turns them into jobs and assessments
pub struct IntakeProcessor {
    repository: Repository,
    store: UploadStore,
    extractor: Arc<dyn TextExtractor>,
    parser: Arc<FormParser>,
    llm: Option<Arc<dyn LlmClient>>,
    structured_temperature: f32,
}

impl IntakeProcessor {
    pub fn new(
        repository: Repository,
        store: UploadStore,
        extractor: Arc<dyn TextExtractor>,
        parser: Arc<FormParser>,
    ) -> Self {
        Self {
            repository,
            store,
            extractor,
            parser,
            llm: None,
            structured_temperature: 0.1,
        }
    }

    /// Ask the LLM for structured certificate data after extraction
    pub fn with_structured_extraction(mut self, llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        self.llm = Some(llm);
        self.structured_temperature = temperature;
        self
    }

    /// Store an upload, open its job and assessment, then process it.
    ///
    /// Validation and storage errors are returned. Extraction errors are
    /// recorded on the job, which comes back with status `failed`.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn intake(&self, filename: &str, bytes: &[u8]) -> Result<IntakeOutcome> {
        let stored = match self.store.save(filename, bytes).await {
            Ok(stored) => stored,
            Err(e) => {
                let extension = Path::new(filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                metrics::record_upload(&extension, bytes.len(), false);
                warn!(error = %e, "Upload rejected");
                return Err(e.into());
            }
        };
        metrics::record_upload(&stored.extension, stored.size, true);

        let job = self
            .repository
            .create_job(NewDocumentJob {
                id: stored.job_id,
                original_filename: stored.filename.clone(),
                stored_path: stored.path.display().to_string(),
                file_extension: stored.extension.clone(),
                content_sha256: stored.sha256.clone(),
                size_bytes: stored.size as i64,
            })
            .await?;

        let assessment = self
            .repository
            .create_assessment(NewAssessment {
                job_id: Some(job.id),
                metadata: json!({ "filename": stored.filename }),
                ..Default::default()
            })
            .await?;

        info!(job_id = %job.id, assessment_id = %assessment.id, "Intake job created");
        self.process(&stored, assessment).await
    }

    async fn process(&self, stored: &StoredUpload, assessment: Assessment) -> Result<IntakeOutcome> {
        let job_id = stored.job_id;
        self.repository.mark_job_extracting(job_id).await?;

        let document = match extract_document(self.extractor.as_ref(), &self.parser, &stored.path).await {
            Ok(document) => document,
            Err(e) => {
                let message = cqi9_common::AppError::from(e).user_message();
                warn!(job_id = %job_id, error = %message, "Text extraction failed");
                let job = self.repository.fail_job(job_id, &message).await?;
                return Ok(IntakeOutcome { job, assessment, parsed: None });
            }
        };

        let DocumentExtraction { extraction, parsed } = document;
        info!(
            job_id = %job_id,
            source = extraction.source.as_str(),
            form_type = %parsed.form_type,
            chars = extraction.text.len(),
            evidence = parsed.audit.evidence.len(),
            "Document extracted"
        );

        let mut job = self
            .repository
            .complete_job(
                job_id,
                extraction.source.as_str(),
                parsed.form_type.as_str(),
                extraction.text.clone(),
            )
            .await?;

        let assessment = self
            .repository
            .update_assessment(assessment.id, seed_assessment(&parsed))
            .await?;

        if let Some(llm) = self.llm.as_ref().filter(|llm| llm.is_configured()) {
            match extract_certificate_data(llm.as_ref(), &extraction.text, self.structured_temperature).await {
                Ok(data) => {
                    let completeness = assess_completeness(&data);
                    info!(job_id = %job_id, completeness = completeness.overall, "Structured data extracted");
                    job = self.repository.set_job_structured_data(job_id, data).await?;
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Structured extraction failed, continuing"),
            }
        }

        Ok(IntakeOutcome { job, assessment, parsed: Some(parsed) })
    }
}

/// Assessment fields found in a parsed document
fn seed_assessment(parsed: &ParsedDocument) -> NewAssessment {
    let audit = &parsed.audit;
    let mut metadata = json!({
        "form_type": parsed.form_type,
        "cover_sheet": audit.cover_sheet,
        "job_audit": audit.job_audit,
        "requirement_ids": audit.requirement_ids,
    });
    if let (Some(survey), Some(obj)) = (&parsed.survey, metadata.as_object_mut()) {
        obj.insert("survey".to_string(), json!(survey));
    }

    NewAssessment {
        supplier: audit.supplier().map(str::to_string),
        audit_date: audit.audit_date().map(str::to_string),
        auditor: audit.auditor().map(str::to_string),
        evidence: audit.evidence.clone(),
        metadata,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::ExtractionSource;
    use async_trait::async_trait;
    use cqi9_common::db::models::JobStatus;
    use cqi9_common::db::DbPool;

    const FORM_TEXT: &str = "CQI-9 Heat Treat System Assessment\n\
        Supplier Name: Acme Heat Treating\n\
        Audit Date: 2024-03-15\n\
        Auditor Name: Jane Smith\n\
        Section 1 Management Responsibility\n\
        1.1 Is there a dedicated heat treat manager? Evidence: Org chart shows J. Doe as manager\n";

    struct StaticExtractor(Option<&'static str>);

    #[async_trait]
    impl TextExtractor for StaticExtractor {
        async fn extract(&self, _path: &Path, _ext: &str) -> std::result::Result<ExtractedText, IngestionError> {
            match self.0 {
                Some(text) => Ok(ExtractedText {
                    text: text.to_string(),
                    source: ExtractionSource::Ocr,
                    pages: None,
                    duration_ms: 1,
                }),
                None => Err(IngestionError::Ocr("Invalid API key".to_string())),
            }
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    async fn processor(root: &Path, text: Option<&'static str>) -> IntakeProcessor {
        let repo = Repository::new(DbPool::in_memory().await.unwrap());
        let allowed = vec!["pdf".to_string(), "png".to_string()];
        IntakeProcessor::new(
            repo,
            UploadStore::new(root, &allowed, 1024 * 1024),
            Arc::new(StaticExtractor(text)),
            Arc::new(FormParser::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_intake_seeds_assessment() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(dir.path(), Some(FORM_TEXT)).await;

        let outcome = processor.intake("sample.pdf", b"%PDF-1.4").await.unwrap();
        assert_eq!(outcome.job.job_status(), JobStatus::Completed);
        assert_eq!(outcome.job.extraction_source.as_deref(), Some("ocr"));
        assert_eq!(outcome.assessment.job_id, Some(outcome.job.id));
        assert_eq!(outcome.assessment.supplier.as_deref(), Some("Acme Heat Treating"));
        assert_eq!(outcome.assessment.auditor.as_deref(), Some("Jane Smith"));
        assert!(outcome.assessment.evidence_map().contains_key("1.1"));
        assert_eq!(outcome.assessment.metadata["filename"], "sample.pdf");
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(dir.path(), None).await;

        let outcome = processor.intake("scan.png", b"\x89PNG").await.unwrap();
        assert_eq!(outcome.job.job_status(), JobStatus::Failed);
        assert_eq!(outcome.job.error_message.as_deref(), Some("Invalid API key"));
        assert!(outcome.parsed.is_none());
    }

    #[tokio::test]
    async fn test_rejected_extension_creates_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(dir.path(), Some(FORM_TEXT)).await;

        let err = processor.intake("payload.exe", b"MZ").await.unwrap_err();
        assert!(matches!(err, cqi9_common::AppError::UnsupportedFileType { .. }));
        assert!(processor.repository.list_jobs().await.unwrap().is_empty());
    }
}
