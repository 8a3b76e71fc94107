//! Analysis result entity: one analyzer verdict, never updated in place

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "analysis_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub assessment_id: Uuid,

    /// Insertion order within the assessment, starting at 1
    pub sequence: i64,

    #[sea_orm(column_type = "Text")]
    pub requirement_id: String,

    pub compliant: bool,

    /// Fraction in [0, 1]
    pub confidence: Option<f64>,

    #[sea_orm(column_type = "Text")]
    pub explanation: String,

    #[sea_orm(column_type = "Json")]
    pub recommendations: Json,

    #[sea_orm(column_type = "Json", column_name = "reference_list")]
    pub references: Json,

    /// Evidence text the verdict was produced from
    #[sea_orm(column_type = "Text")]
    pub evidence: String,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn recommendation_list(&self) -> Vec<String> {
        string_list(&self.recommendations)
    }

    pub fn reference_list(&self) -> Vec<String> {
        string_list(&self.references)
    }
}

fn string_list(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::assessment::Entity",
        from = "Column::AssessmentId",
        to = "super::assessment::Column::Id",
        on_delete = "Cascade"
    )]
    Assessment,
}

impl Related<super::assessment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assessment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
