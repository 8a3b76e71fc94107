//! Assessment entity: a CQI-9 audit being worked through

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall assessment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    InProgress,
    Compliant,
    NonCompliant,
}

impl AssessmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentStatus::InProgress => "in_progress",
            AssessmentStatus::Compliant => "compliant",
            AssessmentStatus::NonCompliant => "non_compliant",
        }
    }
}

impl From<String> for AssessmentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "compliant" => AssessmentStatus::Compliant,
            "non_compliant" => AssessmentStatus::NonCompliant,
            _ => AssessmentStatus::InProgress,
        }
    }
}

impl From<AssessmentStatus> for String {
    fn from(status: AssessmentStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assessments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Option<Uuid>,

    #[sea_orm(column_type = "Text", nullable)]
    pub supplier: Option<String>,

    /// Audit date as written on the form
    #[sea_orm(column_type = "Text", nullable)]
    pub audit_date: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub auditor: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Requirement id -> objective evidence text
    #[sea_orm(column_type = "Json")]
    pub evidence: Json,

    /// Cover sheet and job audit fields
    #[sea_orm(column_type = "Json")]
    pub metadata: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn assessment_status(&self) -> AssessmentStatus {
        AssessmentStatus::from(self.status.clone())
    }

    /// Evidence keyed by requirement id; non-string values are ignored
    pub fn evidence_map(&self) -> BTreeMap<String, String> {
        self.evidence
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Requirement ids that have non-blank evidence
    pub fn evidenced_requirements(&self) -> Vec<String> {
        self.evidence_map()
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(id, _)| id)
            .collect()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document_job::Entity",
        from = "Column::JobId",
        to = "super::document_job::Column::Id",
        on_delete = "SetNull"
    )]
    DocumentJob,

    #[sea_orm(has_many = "super::analysis_result::Entity")]
    AnalysisResult,
}

impl Related<super::document_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentJob.def()
    }
}

impl Related<super::analysis_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AnalysisResult.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
