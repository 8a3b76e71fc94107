//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Fields needed to record a stored upload
#[derive(Debug, Clone)]
pub struct NewDocumentJob {
    pub id: Uuid,
    pub original_filename: String,
    pub stored_path: String,
    pub file_extension: String,
    pub content_sha256: String,
    pub size_bytes: i64,
}

/// Fields needed to open an assessment
#[derive(Debug, Clone, Default)]
pub struct NewAssessment {
    pub id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub supplier: Option<String>,
    pub audit_date: Option<String>,
    pub auditor: Option<String>,
    pub evidence: BTreeMap<String, String>,
    pub metadata: serde_json::Value,
}

/// One analyzer verdict to append
#[derive(Debug, Clone)]
pub struct NewAnalysisResult {
    pub assessment_id: Uuid,
    pub requirement_id: String,
    pub compliant: bool,
    pub confidence: Option<f64>,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub references: Vec<String>,
    pub evidence: String,
}

/// Repository for data access operations.
///
/// Writes to one assessment (evidence, verdicts, status) are serialized
/// through a per-assessment lock and run inside a transaction, so
/// concurrent analyses of the same assessment never drop each other's
/// evidence.
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    assessment_locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            assessment_locks: Arc::default(),
        }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Exclusive write access to one assessment
    async fn lock_assessment(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .assessment_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn forget_assessment_lock(&self, id: Uuid) {
        let mut locks = self
            .assessment_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&id);
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Document Job Operations
    // ========================================================================

    /// Record a freshly stored upload
    pub async fn create_job(&self, new: NewDocumentJob) -> Result<DocumentJob> {
        let job = DocumentJobActiveModel {
            id: Set(new.id),
            original_filename: Set(new.original_filename),
            stored_path: Set(new.stored_path),
            file_extension: Set(new.file_extension),
            content_sha256: Set(new.content_sha256),
            size_bytes: Set(new.size_bytes),
            status: Set(JobStatus::Pending.into()),
            extraction_source: Set(None),
            form_type: Set(None),
            extracted_text: Set(None),
            structured_data: Set(None),
            error_message: Set(None),
            created_at: Set(chrono::Utc::now().into()),
            started_at: Set(None),
            completed_at: Set(None),
        };

        job.insert(self.conn()).await.map_err(Into::into)
    }

    /// Find job by ID
    pub async fn find_job_by_id(&self, id: Uuid) -> Result<Option<DocumentJob>> {
        DocumentJobEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Find job by ID, failing with JobNotFound
    pub async fn get_job(&self, id: Uuid) -> Result<DocumentJob> {
        self.find_job_by_id(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })
    }

    /// All jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<DocumentJob>> {
        DocumentJobEntity::find()
            .order_by_desc(DocumentJobColumn::CreatedAt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Mark a job as extracting
    pub async fn mark_job_extracting(&self, id: Uuid) -> Result<DocumentJob> {
        let mut job = self.get_job(id).await?.into_active_model();
        job.status = Set(JobStatus::Extracting.into());
        job.started_at = Set(Some(chrono::Utc::now().into()));
        job.update(self.conn()).await.map_err(Into::into)
    }

    /// Store extraction output and mark the job completed
    pub async fn complete_job(
        &self,
        id: Uuid,
        extraction_source: &str,
        form_type: &str,
        extracted_text: String,
    ) -> Result<DocumentJob> {
        let mut job = self.get_job(id).await?.into_active_model();
        job.status = Set(JobStatus::Completed.into());
        job.extraction_source = Set(Some(extraction_source.to_string()));
        job.form_type = Set(Some(form_type.to_string()));
        job.extracted_text = Set(Some(extracted_text));
        job.error_message = Set(None);
        job.completed_at = Set(Some(chrono::Utc::now().into()));
        job.update(self.conn()).await.map_err(Into::into)
    }

    /// Attach structured certificate data to a job
    pub async fn set_job_structured_data(
        &self,
        id: Uuid,
        data: serde_json::Value,
    ) -> Result<DocumentJob> {
        let mut job = self.get_job(id).await?.into_active_model();
        job.structured_data = Set(Some(data));
        job.update(self.conn()).await.map_err(Into::into)
    }

    /// Mark a job as failed
    pub async fn fail_job(&self, id: Uuid, message: &str) -> Result<DocumentJob> {
        let mut job = self.get_job(id).await?.into_active_model();
        job.status = Set(JobStatus::Failed.into());
        job.error_message = Set(Some(message.to_string()));
        job.completed_at = Set(Some(chrono::Utc::now().into()));
        job.update(self.conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Assessment Operations
    // ========================================================================

    /// Open a new assessment
    pub async fn create_assessment(&self, new: NewAssessment) -> Result<Assessment> {
        let now = chrono::Utc::now();

        let assessment = AssessmentActiveModel {
            id: Set(new.id.unwrap_or_else(Uuid::new_v4)),
            job_id: Set(new.job_id),
            supplier: Set(new.supplier),
            audit_date: Set(new.audit_date),
            auditor: Set(new.auditor),
            status: Set(AssessmentStatus::InProgress.into()),
            evidence: Set(serde_json::to_value(&new.evidence)?),
            metadata: Set(normalize_metadata(new.metadata)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        assessment.insert(self.conn()).await.map_err(Into::into)
    }

    /// Find assessment by ID
    pub async fn find_assessment_by_id(&self, id: Uuid) -> Result<Option<Assessment>> {
        AssessmentEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Find assessment by ID, failing with AssessmentNotFound
    pub async fn get_assessment(&self, id: Uuid) -> Result<Assessment> {
        load_assessment(self.conn(), id).await
    }

    /// The assessment opened for an upload
    pub async fn find_assessment_by_job(&self, job_id: Uuid) -> Result<Option<Assessment>> {
        AssessmentEntity::find()
            .filter(AssessmentColumn::JobId.eq(job_id))
            .order_by_asc(AssessmentColumn::CreatedAt)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// All assessments, most recently touched first
    pub async fn list_assessments(&self) -> Result<Vec<Assessment>> {
        AssessmentEntity::find()
            .order_by_desc(AssessmentColumn::UpdatedAt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Overwrite the editable fields of an assessment.
    ///
    /// Evidence entries are merged: keys present in `new.evidence` replace
    /// the stored text, other stored entries are kept.
    pub async fn update_assessment(&self, id: Uuid, new: NewAssessment) -> Result<Assessment> {
        let _guard = self.lock_assessment(id).await;
        let txn = self.conn().begin().await?;

        let existing = load_assessment(&txn, id).await?;

        let mut evidence = existing.evidence_map();
        evidence.extend(new.evidence);

        let mut metadata = existing.metadata.clone();
        if let (Some(target), Some(patch)) = (metadata.as_object_mut(), new.metadata.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }

        let mut active = existing.into_active_model();
        if new.supplier.is_some() {
            active.supplier = Set(new.supplier);
        }
        if new.audit_date.is_some() {
            active.audit_date = Set(new.audit_date);
        }
        if new.auditor.is_some() {
            active.auditor = Set(new.auditor);
        }
        active.evidence = Set(serde_json::to_value(&evidence)?);
        active.metadata = Set(metadata);
        active.updated_at = Set(chrono::Utc::now().into());

        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Delete an assessment and its results
    pub async fn delete_assessment(&self, id: Uuid) -> Result<bool> {
        let guard = self.lock_assessment(id).await;
        let txn = self.conn().begin().await?;

        AnalysisResultEntity::delete_many()
            .filter(AnalysisResultColumn::AssessmentId.eq(id))
            .exec(&txn)
            .await?;

        let result = AssessmentEntity::delete_by_id(id)
            .exec(&txn)
            .await?;

        txn.commit().await?;
        drop(guard);
        self.forget_assessment_lock(id);

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Analysis Result Operations
    // ========================================================================

    /// Append a verdict. Earlier verdicts for the same requirement stay in
    /// the table but stop being current.
    pub async fn record_analysis(&self, new: NewAnalysisResult) -> Result<AnalysisResult> {
        let _guard = self.lock_assessment(new.assessment_id).await;
        let txn = self.conn().begin().await?;
        let result = insert_analysis(&txn, new).await?;
        txn.commit().await?;
        Ok(result)
    }

    /// Store the analyzed evidence, append the verdict and refresh the
    /// overall status as one unit
    pub async fn record_verdict(&self, new: NewAnalysisResult) -> Result<Assessment> {
        let assessment_id = new.assessment_id;
        let _guard = self.lock_assessment(assessment_id).await;
        let txn = self.conn().begin().await?;

        let existing = load_assessment(&txn, assessment_id).await?;
        let mut evidence = existing.evidence_map();
        evidence.insert(new.requirement_id.clone(), new.evidence.clone());

        let mut active = existing.into_active_model();
        active.evidence = Set(serde_json::to_value(&evidence)?);
        active.updated_at = Set(chrono::Utc::now().into());
        let assessment = active.update(&txn).await?;

        insert_analysis(&txn, new).await?;
        let assessment = apply_status(&txn, assessment).await?;

        txn.commit().await?;
        Ok(assessment)
    }

    /// Every verdict for an assessment, oldest first
    pub async fn analysis_history(&self, assessment_id: Uuid) -> Result<Vec<AnalysisResult>> {
        load_history(self.conn(), assessment_id).await
    }

    /// The newest verdict per requirement
    pub async fn current_results(
        &self,
        assessment_id: Uuid,
    ) -> Result<BTreeMap<String, AnalysisResult>> {
        let history = self.analysis_history(assessment_id).await?;
        Ok(latest_per_requirement(history))
    }

    /// Recompute and persist the overall status from the current verdicts
    pub async fn refresh_assessment_status(&self, assessment_id: Uuid) -> Result<Assessment> {
        let _guard = self.lock_assessment(assessment_id).await;
        let txn = self.conn().begin().await?;
        let assessment = load_assessment(&txn, assessment_id).await?;
        let assessment = apply_status(&txn, assessment).await?;
        txn.commit().await?;
        Ok(assessment)
    }
}

async fn load_assessment<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Assessment> {
    AssessmentEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::AssessmentNotFound { id: id.to_string() })
}

/// Oldest first; the per-assessment sequence breaks timestamp ties
async fn load_history<C: ConnectionTrait>(conn: &C, assessment_id: Uuid) -> Result<Vec<AnalysisResult>> {
    AnalysisResultEntity::find()
        .filter(AnalysisResultColumn::AssessmentId.eq(assessment_id))
        .order_by_asc(AnalysisResultColumn::Sequence)
        .order_by_asc(AnalysisResultColumn::CreatedAt)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// Callers hold the assessment lock, so the sequence stays strictly increasing
async fn insert_analysis<C: ConnectionTrait>(conn: &C, new: NewAnalysisResult) -> Result<AnalysisResult> {
    let last = AnalysisResultEntity::find()
        .filter(AnalysisResultColumn::AssessmentId.eq(new.assessment_id))
        .order_by_desc(AnalysisResultColumn::Sequence)
        .one(conn)
        .await?;
    let sequence = last.map_or(1, |r| r.sequence + 1);

    let result = AnalysisResultActiveModel {
        id: Set(Uuid::new_v4()),
        assessment_id: Set(new.assessment_id),
        sequence: Set(sequence),
        requirement_id: Set(new.requirement_id),
        compliant: Set(new.compliant),
        confidence: Set(new.confidence),
        explanation: Set(new.explanation),
        recommendations: Set(serde_json::to_value(&new.recommendations)?),
        references: Set(serde_json::to_value(&new.references)?),
        evidence: Set(new.evidence),
        created_at: Set(chrono::Utc::now().into()),
    };

    result.insert(conn).await.map_err(Into::into)
}

async fn apply_status<C: ConnectionTrait>(conn: &C, assessment: Assessment) -> Result<Assessment> {
    let current = latest_per_requirement(load_history(conn, assessment.id).await?);
    let status = overall_status(&assessment.evidenced_requirements(), &current);

    if assessment.assessment_status() == status {
        return Ok(assessment);
    }

    tracing::info!(
        assessment_id = %assessment.id,
        status = status.as_str(),
        "Assessment status changed"
    );

    let mut active = assessment.into_active_model();
    active.status = Set(status.into());
    active.updated_at = Set(chrono::Utc::now().into());
    active.update(conn).await.map_err(Into::into)
}

/// Later rows replace earlier ones, so the input must be oldest first
fn latest_per_requirement(history: Vec<AnalysisResult>) -> BTreeMap<String, AnalysisResult> {
    let mut current = BTreeMap::new();
    for result in history {
        current.insert(result.requirement_id.clone(), result);
    }
    current
}

/// Overall status of an assessment.
///
/// No verdicts yet -> in progress. Any current non-compliant verdict ->
/// non-compliant. Every evidenced requirement compliant -> compliant.
/// Anything else is still in progress.
pub fn overall_status(
    evidenced: &[String],
    current: &BTreeMap<String, AnalysisResult>,
) -> AssessmentStatus {
    if current.is_empty() {
        return AssessmentStatus::InProgress;
    }
    if current.values().any(|r| !r.compliant) {
        return AssessmentStatus::NonCompliant;
    }
    let all_covered = evidenced
        .iter()
        .all(|id| current.get(id).is_some_and(|r| r.compliant));
    if all_covered {
        AssessmentStatus::Compliant
    } else {
        AssessmentStatus::InProgress
    }
}

fn normalize_metadata(value: serde_json::Value) -> serde_json::Value {
    if value.is_object() {
        value
    } else {
        serde_json::Value::Object(Default::default())
    }
}
