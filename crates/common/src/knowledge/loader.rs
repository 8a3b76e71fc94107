//! Knowledge dataset loading from JSON and CSV sources
//!
//! A data directory may contain either a consolidated `knowledge.json`
//! or any of `sections.json`, `requirements.json`, `process_tables.json`,
//! `relationships.json`, `sections.csv` and `requirements.csv`.
//! Records are read leniently and normalized into a [`KnowledgeDataset`].

use super::{
    KnowledgeDataset, ProcessTable, Relationship, RelationshipType, Requirement,
    RequirementCategory, RequirementCriticality, Section,
};
use crate::errors::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Name of the consolidated dataset file
pub const CONSOLIDATED_FILE: &str = "knowledge.json";

/// Dataset as found on disk, before validation
#[derive(Debug, Default, Deserialize)]
pub struct RawDataset {
    #[serde(default)]
    pub sections: Vec<RawSection>,
    #[serde(default)]
    pub requirements: Vec<RawRequirement>,
    #[serde(default)]
    pub process_tables: Vec<ProcessTable>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

#[derive(Debug, Deserialize)]
pub struct RawSection {
    pub number: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawRequirement {
    pub id: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub criticality: Option<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub verification_method: String,
}

#[derive(Debug, Deserialize)]
pub struct RawRelationship {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(rename = "type", default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// CSV sections carry their level as text
#[derive(Debug, Deserialize)]
struct SectionRow {
    number: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

impl From<SectionRow> for RawSection {
    fn from(row: SectionRow) -> Self {
        let level = match row.level.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(level) => Some(level),
                Err(_) => {
                    warn!(section = %row.number, level = %raw, "Invalid section level, using 1");
                    Some(1)
                }
            },
        };
        RawSection {
            number: row.number,
            title: row.title,
            description: row.description,
            level,
            parent: row.parent,
        }
    }
}

impl RawDataset {
    fn extend(&mut self, other: RawDataset) {
        self.sections.extend(other.sections);
        self.requirements.extend(other.requirements);
        self.process_tables.extend(other.process_tables);
        self.relationships.extend(other.relationships);
    }

    /// Normalize every record.
    ///
    /// Unknown categories fall back to mandatory and unknown criticalities
    /// to medium. Relationships with an unknown type or a missing endpoint
    /// are dropped. Each correction is logged.
    pub fn into_dataset(self) -> KnowledgeDataset {
        let sections = self
            .sections
            .into_iter()
            .filter(|s| !s.number.trim().is_empty())
            .map(|s| Section {
                number: s.number.trim().to_string(),
                title: s.title,
                description: s.description,
                level: s.level.unwrap_or(1),
                parent: non_empty(s.parent),
            })
            .collect();

        let requirements = self
            .requirements
            .into_iter()
            .filter(|r| !r.id.trim().is_empty())
            .map(normalize_requirement)
            .collect();

        let relationships = self
            .relationships
            .into_iter()
            .filter_map(normalize_relationship)
            .collect();

        KnowledgeDataset {
            sections,
            requirements,
            process_tables: self.process_tables,
            relationships,
        }
    }
}

fn normalize_requirement(raw: RawRequirement) -> Requirement {
    let id = raw.id.trim().to_string();

    let category = match non_empty(raw.category) {
        None => RequirementCategory::Mandatory,
        Some(value) => RequirementCategory::parse(&value).unwrap_or_else(|| {
            warn!(requirement_id = %id, category = %value, "Invalid category, using mandatory");
            RequirementCategory::Mandatory
        }),
    };

    let criticality = match non_empty(raw.criticality) {
        None => RequirementCriticality::Medium,
        Some(value) => RequirementCriticality::parse(&value).unwrap_or_else(|| {
            warn!(requirement_id = %id, criticality = %value, "Invalid criticality, using medium");
            RequirementCriticality::Medium
        }),
    };

    Requirement {
        id,
        section: raw.section.trim().to_string(),
        text: raw.text.trim().to_string(),
        category,
        criticality,
        rationale: raw.rationale,
        verification_method: raw.verification_method,
    }
}

fn normalize_relationship(raw: RawRelationship) -> Option<Relationship> {
    let type_name = raw.relationship.unwrap_or_default();
    let Some(relationship) = RelationshipType::parse(&type_name) else {
        warn!(relationship_type = %type_name, "Invalid relationship type, skipping");
        return None;
    };

    let (Some(source_id), Some(target_id)) = (non_empty(raw.source_id), non_empty(raw.target_id)) else {
        warn!("Relationship without source_id or target_id, skipping");
        return None;
    };

    Some(Relationship {
        source_id,
        target_id,
        relationship,
        properties: raw.properties,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a consolidated dataset file
pub fn load_json_file(path: &Path) -> Result<RawDataset> {
    read_json(path)
}

/// Read every recognised source in a directory.
///
/// Returns `None` when the directory holds none of the known files.
pub fn load_dir(dir: &Path) -> Result<Option<RawDataset>> {
    let mut dataset = RawDataset::default();
    let mut found = false;

    let consolidated = dir.join(CONSOLIDATED_FILE);
    if consolidated.is_file() {
        dataset.extend(read_json(&consolidated)?);
        found = true;
    }

    let sections_json = dir.join("sections.json");
    if sections_json.is_file() {
        dataset.sections.extend(read_json::<Vec<RawSection>>(&sections_json)?);
        found = true;
    }

    let requirements_json = dir.join("requirements.json");
    if requirements_json.is_file() {
        dataset.requirements.extend(read_json::<Vec<RawRequirement>>(&requirements_json)?);
        found = true;
    }

    let tables_json = dir.join("process_tables.json");
    if tables_json.is_file() {
        dataset.process_tables.extend(read_json::<Vec<ProcessTable>>(&tables_json)?);
        found = true;
    }

    let relationships_json = dir.join("relationships.json");
    if relationships_json.is_file() {
        dataset.relationships.extend(read_json::<Vec<RawRelationship>>(&relationships_json)?);
        found = true;
    }

    let sections_csv = dir.join("sections.csv");
    if sections_csv.is_file() {
        let rows: Vec<SectionRow> = read_csv(&sections_csv)?;
        dataset.sections.extend(rows.into_iter().map(RawSection::from));
        found = true;
    }

    let requirements_csv = dir.join("requirements.csv");
    if requirements_csv.is_file() {
        dataset.requirements.extend(read_csv::<RawRequirement>(&requirements_csv)?);
        found = true;
    }

    if found {
        info!(
            dir = %dir.display(),
            sections = dataset.sections.len(),
            requirements = dataset.requirements.len(),
            process_tables = dataset.process_tables.len(),
            relationships = dataset.relationships.len(),
            "Loaded knowledge sources"
        );
        Ok(Some(dataset))
    } else {
        Ok(None)
    }
}

/// Write the consolidated dataset file, creating the directory if needed
pub fn write_dataset(dir: &Path, dataset: &KnowledgeDataset) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CONSOLIDATED_FILE);
    let json = serde_json::to_string_pretty(dataset)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| AppError::InvalidFormat {
        message: format!("{}: {}", path.display(), e),
    })
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| AppError::InvalidFormat {
            message: format!("{}: {}", path.display(), e),
        })?;

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| AppError::InvalidFormat {
            message: format!("{}: {}", path.display(), e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_enums_fall_back() {
        let raw: RawDataset = serde_json::from_str(
            r#"{
                "requirements": [
                    {"id": "1.1", "section": "1", "text": "t", "category": "required", "criticality": "extreme"},
                    {"id": "1.2", "section": "1", "text": "t"}
                ],
                "relationships": [
                    {"source_id": "1.1", "target_id": "1.2", "type": "LINKS"},
                    {"source_id": "1.1", "type": "DEPENDS_ON"},
                    {"source_id": "1.2", "target_id": "1.1", "type": "depends_on"}
                ]
            }"#,
        )
        .unwrap();

        let dataset = raw.into_dataset();
        assert_eq!(dataset.requirements[0].category, RequirementCategory::Mandatory);
        assert_eq!(dataset.requirements[0].criticality, RequirementCriticality::Medium);
        assert_eq!(dataset.relationships.len(), 1);
        assert_eq!(dataset.relationships[0].relationship, RelationshipType::DependsOn);
    }

    #[test]
    fn test_load_dir_reads_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sections.csv"),
            "number,title,description,parent,level\n1,Management Responsibility,,,1\n1.1,Planning,,1,two\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("requirements.csv"),
            "id,text,section,category,criticality,rationale,verification_method\n\
             1.1,Keep procedures current,1,mandatory,high,,Review documents\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("process_tables.json"),
            r#"[{"id": "TABLE-A", "name": "Pyrometry", "parameters": ["tus_frequency"]}]"#,
        )
        .unwrap();

        let dataset = load_dir(dir.path()).unwrap().unwrap().into_dataset();
        assert_eq!(dataset.sections.len(), 2);
        assert_eq!(dataset.sections[1].level, 1);
        assert_eq!(dataset.sections[1].parent.as_deref(), Some("1"));
        assert_eq!(dataset.sections[0].parent, None);
        assert_eq!(dataset.requirements[0].criticality, RequirementCriticality::High);
        assert_eq!(dataset.process_tables[0].id, "TABLE-A");
    }

    #[test]
    fn test_empty_dir_has_no_dataset() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dir(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_json_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.json"), "{not json").unwrap();
        let err = load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat { .. }));
    }

    #[test]
    fn test_written_dataset_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = KnowledgeDataset {
            sections: vec![Section {
                number: "1".into(),
                title: "Management".into(),
                description: String::new(),
                level: 1,
                parent: None,
            }],
            ..Default::default()
        };
        let path = write_dataset(dir.path(), &dataset).unwrap();
        let reloaded = load_json_file(&path).unwrap().into_dataset();
        assert_eq!(reloaded, dataset);
    }
}
