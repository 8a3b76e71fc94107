//! SeaORM entity models
//!
//! Database entities for the CQI-9 portal

mod document_job;
mod assessment;
mod analysis_result;

pub use document_job::{
    Entity as DocumentJobEntity,
    Model as DocumentJob,
    ActiveModel as DocumentJobActiveModel,
    Column as DocumentJobColumn,
    JobStatus,
};

pub use assessment::{
    Entity as AssessmentEntity,
    Model as Assessment,
    ActiveModel as AssessmentActiveModel,
    Column as AssessmentColumn,
    AssessmentStatus,
};

pub use analysis_result::{
    Entity as AnalysisResultEntity,
    Model as AnalysisResult,
    ActiveModel as AnalysisResultActiveModel,
    Column as AnalysisResultColumn,
};
