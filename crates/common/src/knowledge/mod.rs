//! CQI-9 knowledge store
//!
//! Read-only reference data the analyzer builds its prompts from:
//! sections, requirements, process tables and the typed relationships
//! between them. Loaded once at startup from JSON/CSV files, or from the
//! dataset bundled with the crate.

mod loader;
mod store;

pub use loader::{load_dir, load_json_file, write_dataset, RawDataset, CONSOLIDATED_FILE};
pub use store::{KnowledgeStats, KnowledgeStore, RelatedRequirement, RequirementContext};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Requirement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementCategory {
    Mandatory,
    Recommended,
    Optional,
}

impl RequirementCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mandatory" => Some(Self::Mandatory),
            "recommended" => Some(Self::Recommended),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Recommended => "recommended",
            Self::Optional => "optional",
        }
    }
}

/// How much a requirement weighs in an audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementCriticality {
    High,
    Medium,
    Low,
}

impl RequirementCriticality {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Edge types between knowledge entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Section contains a subsection or requirement
    Contains,
    /// Requirement references a process table
    References,
    DependsOn,
    Contradicts,
    Clarifies,
    Supports,
    Interprets,
    /// Requirement applies to a specific scenario
    AppliesTo,
}

impl RelationshipType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONTAINS" => Some(Self::Contains),
            "REFERENCES" => Some(Self::References),
            "DEPENDS_ON" => Some(Self::DependsOn),
            "CONTRADICTS" => Some(Self::Contradicts),
            "CLARIFIES" => Some(Self::Clarifies),
            "SUPPORTS" => Some(Self::Supports),
            "INTERPRETS" => Some(Self::Interprets),
            "APPLIES_TO" => Some(Self::AppliesTo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::References => "REFERENCES",
            Self::DependsOn => "DEPENDS_ON",
            Self::Contradicts => "CONTRADICTS",
            Self::Clarifies => "CLARIFIES",
            Self::Supports => "SUPPORTS",
            Self::Interprets => "INTERPRETS",
            Self::AppliesTo => "APPLIES_TO",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numbered section of the CQI-9 document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

fn default_level() -> u32 {
    1
}

/// A single auditable requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub section: String,
    pub text: String,
    pub category: RequirementCategory,
    pub criticality: RequirementCriticality,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub verification_method: String,
}

/// One row of a process table: the permitted range of a parameter,
/// optionally for a specific process class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceRow {
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ToleranceRow {
    /// Human readable limit, e.g. "±5 °C" or "min 0.5, max 2"
    pub fn describe(&self, unit: Option<&str>) -> String {
        let unit = unit.map(|u| format!(" {}", u)).unwrap_or_default();
        let mut parts = Vec::new();
        if let Some(t) = self.tolerance {
            parts.push(format!("±{}{}", t, unit));
        }
        if let Some(min) = self.min {
            parts.push(format!("min {}{}", min, unit));
        }
        if let Some(max) = self.max {
            parts.push(format!("max {}{}", max, unit));
        }
        if parts.is_empty() {
            parts.push("see note".to_string());
        }
        let mut out = parts.join(", ");
        if let Some(class) = &self.process_class {
            out = format!("{} (class {})", out, class);
        }
        if let Some(note) = &self.note {
            out = format!("{}; {}", out, note);
        }
        out
    }
}

/// A CQI-9 process table (pyrometry, quench, tempering limits...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub units: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerances: Vec<ToleranceRow>,
}

/// Directed, typed edge between two knowledge entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relationship: RelationshipType,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Fully validated dataset, the shape written to `knowledge.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDataset {
    pub sections: Vec<Section>,
    pub requirements: Vec<Requirement>,
    pub process_tables: Vec<ProcessTable>,
    pub relationships: Vec<Relationship>,
}

/// Kind of CQI-9 document, identified from its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    TemperatureUniformitySurvey,
    SystemAccuracyTest,
    ThermocoupleCalibration,
    InstrumentationCalibration,
    HeatTreatmentRecord,
    ProcessCapability,
    EquipmentMaintenance,
    Unknown,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemperatureUniformitySurvey => "temperature_uniformity_survey",
            Self::SystemAccuracyTest => "system_accuracy_test",
            Self::ThermocoupleCalibration => "thermocouple_calibration",
            Self::InstrumentationCalibration => "instrumentation_calibration",
            Self::HeatTreatmentRecord => "heat_treatment_record",
            Self::ProcessCapability => "process_capability",
            Self::EquipmentMaintenance => "equipment_maintenance",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "temperature_uniformity_survey" => Self::TemperatureUniformitySurvey,
            "system_accuracy_test" => Self::SystemAccuracyTest,
            "thermocouple_calibration" => Self::ThermocoupleCalibration,
            "instrumentation_calibration" => Self::InstrumentationCalibration,
            "heat_treatment_record" => Self::HeatTreatmentRecord,
            "process_capability" => Self::ProcessCapability,
            "equipment_maintenance" => Self::EquipmentMaintenance,
            _ => Self::Unknown,
        }
    }

    /// Title used in reports
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::TemperatureUniformitySurvey => "Temperature Uniformity Survey",
            Self::SystemAccuracyTest => "System Accuracy Test",
            Self::ThermocoupleCalibration => "Thermocouple Calibration",
            Self::InstrumentationCalibration => "Instrumentation Calibration",
            Self::HeatTreatmentRecord => "Heat Treatment Record",
            Self::ProcessCapability => "Process Capability Study",
            Self::EquipmentMaintenance => "Equipment Maintenance Record",
            Self::Unknown => "Unknown Document",
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
