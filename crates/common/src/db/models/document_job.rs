//! Document job entity: one uploaded form or certificate

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job status enum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Extracting,
    Completed,
    Failed,
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => JobStatus::Pending,
            "extracting" => JobStatus::Extracting,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => "pending".to_string(),
            JobStatus::Extracting => "extracting".to_string(),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::Failed => "failed".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub original_filename: String,

    #[sea_orm(column_type = "Text")]
    pub stored_path: String,

    #[sea_orm(column_type = "Text")]
    pub file_extension: String,

    #[sea_orm(column_type = "Text")]
    pub content_sha256: String,

    pub size_bytes: i64,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// "ocr" or "local_pdf"
    #[sea_orm(column_type = "Text", nullable)]
    pub extraction_source: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub form_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text: Option<String>,

    /// Structured certificate fields returned by the LLM
    #[sea_orm(column_type = "Json", nullable)]
    pub structured_data: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the job status as an enum
    pub fn job_status(&self) -> JobStatus {
        JobStatus::from(self.status.clone())
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.job_status(), JobStatus::Completed | JobStatus::Failed)
    }

    /// Extracted text, if extraction produced any
    pub fn text(&self) -> Option<&str> {
        self.extracted_text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::assessment::Entity")]
    Assessment,
}

impl Related<super::assessment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assessment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
