//! In-memory knowledge store with relationship indexes

use super::loader::{load_dir, RawDataset};
use super::{
    KnowledgeDataset, ProcessTable, Relationship, RelationshipType, Requirement,
    RequirementCriticality, Section,
};
use crate::config::KnowledgeConfig;
use crate::errors::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Dataset shipped with the crate, used when no data directory is found
const BUNDLED_DATASET: &str = include_str!("../../data/knowledge.json");

/// A requirement linked to the one being looked at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedRequirement {
    pub id: String,
    pub text: String,
    pub relationship: RelationshipType,
}

/// Everything the analyzer needs to know about one requirement
#[derive(Debug, Clone, Serialize)]
pub struct RequirementContext {
    pub requirement: Requirement,
    pub section: Option<Section>,
    /// Requirements this one points at
    pub outgoing: Vec<RelatedRequirement>,
    /// Requirements pointing at this one
    pub incoming: Vec<RelatedRequirement>,
    /// Process tables this requirement references
    pub process_tables: Vec<ProcessTable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub sections: usize,
    pub requirements: usize,
    pub process_tables: usize,
    pub relationships: usize,
}

/// Read-only CQI-9 knowledge, indexed for lookups by id
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    sections: Vec<Section>,
    section_index: HashMap<String, usize>,
    requirements: Vec<Requirement>,
    requirement_index: HashMap<String, usize>,
    process_tables: Vec<ProcessTable>,
    table_index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl KnowledgeStore {
    /// Build the store.
    ///
    /// Entries are keyed by id; a later entry with the same id replaces the
    /// earlier one in place. Relationships whose endpoints are unknown are
    /// dropped.
    pub fn from_dataset(dataset: KnowledgeDataset) -> Self {
        let mut store = Self {
            sections: Vec::new(),
            section_index: HashMap::new(),
            requirements: Vec::new(),
            requirement_index: HashMap::new(),
            process_tables: Vec::new(),
            table_index: HashMap::new(),
            relationships: Vec::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        };

        for section in dataset.sections {
            upsert(&mut store.sections, &mut store.section_index, section.number.clone(), section);
        }
        for requirement in dataset.requirements {
            upsert(
                &mut store.requirements,
                &mut store.requirement_index,
                requirement.id.clone(),
                requirement,
            );
        }
        for table in dataset.process_tables {
            upsert(&mut store.process_tables, &mut store.table_index, table.id.clone(), table);
        }

        for requirement in &store.requirements {
            if !requirement.section.is_empty() && !store.section_index.contains_key(&requirement.section) {
                warn!(
                    requirement_id = %requirement.id,
                    section = %requirement.section,
                    "Requirement refers to an unknown section"
                );
            }
        }

        for relationship in dataset.relationships {
            if !store.node_exists(&relationship.source_id) || !store.node_exists(&relationship.target_id) {
                warn!(
                    source_id = %relationship.source_id,
                    target_id = %relationship.target_id,
                    relationship_type = %relationship.relationship,
                    "Relationship endpoint not found, skipping"
                );
                continue;
            }
            let idx = store.relationships.len();
            store.outgoing.entry(relationship.source_id.clone()).or_default().push(idx);
            store.incoming.entry(relationship.target_id.clone()).or_default().push(idx);
            store.relationships.push(relationship);
        }

        store
    }

    /// The dataset bundled with the crate
    pub fn bundled() -> Result<Self> {
        let raw: RawDataset = serde_json::from_str(BUNDLED_DATASET)?;
        Ok(Self::from_dataset(raw.into_dataset()))
    }

    /// Load from the configured data directory, falling back to the bundled
    /// dataset when the directory holds no knowledge files
    pub fn load(config: &KnowledgeConfig) -> Result<Self> {
        let store = match load_dir(&config.data_dir)? {
            Some(raw) => Self::from_dataset(raw.into_dataset()),
            None => {
                info!(
                    dir = %config.data_dir.display(),
                    "No knowledge files found, using bundled CQI-9 dataset"
                );
                Self::bundled()?
            }
        };

        if store.requirements.is_empty() {
            return Err(AppError::Configuration {
                message: format!(
                    "Knowledge dataset in {} has no requirements",
                    config.data_dir.display()
                ),
            });
        }

        let stats = store.stats();
        info!(
            sections = stats.sections,
            requirements = stats.requirements,
            process_tables = stats.process_tables,
            relationships = stats.relationships,
            "Knowledge store ready"
        );

        Ok(store)
    }

    fn node_exists(&self, id: &str) -> bool {
        self.requirement_index.contains_key(id)
            || self.section_index.contains_key(id)
            || self.table_index.contains_key(id)
    }

    pub fn stats(&self) -> KnowledgeStats {
        KnowledgeStats {
            sections: self.sections.len(),
            requirements: self.requirements.len(),
            process_tables: self.process_tables.len(),
            relationships: self.relationships.len(),
        }
    }

    /// Snapshot of the store in the consolidated file layout
    pub fn dataset(&self) -> KnowledgeDataset {
        KnowledgeDataset {
            sections: self.sections.clone(),
            requirements: self.requirements.clone(),
            process_tables: self.process_tables.clone(),
            relationships: self.relationships.clone(),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, number: &str) -> Option<&Section> {
        self.section_index.get(number).map(|&i| &self.sections[i])
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn requirement(&self, id: &str) -> Option<&Requirement> {
        self.requirement_index.get(id).map(|&i| &self.requirements[i])
    }

    pub fn process_table(&self, id: &str) -> Option<&ProcessTable> {
        self.table_index.get(id).map(|&i| &self.process_tables[i])
    }

    /// Requirements of a section, in dataset order
    pub fn section_requirements(&self, number: &str) -> Vec<&Requirement> {
        self.requirements.iter().filter(|r| r.section == number).collect()
    }

    /// Requirements matching the optional section and criticality filters
    pub fn filter_requirements(
        &self,
        section: Option<&str>,
        criticality: Option<RequirementCriticality>,
    ) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| section.map_or(true, |s| r.section == s))
            .filter(|r| criticality.map_or(true, |c| r.criticality == c))
            .collect()
    }

    /// Requirements whose text contains any of the keywords (case-insensitive)
    pub fn search(&self, keywords: &[&str]) -> Vec<&Requirement> {
        let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        self.requirements
            .iter()
            .filter(|r| {
                let text = r.text.to_lowercase();
                needles.iter().any(|n| text.contains(n.as_str()))
            })
            .collect()
    }

    /// Requirements this one points at, optionally of one relationship type
    pub fn related_requirements(
        &self,
        id: &str,
        relationship: Option<RelationshipType>,
    ) -> Vec<RelatedRequirement> {
        self.edges(&self.outgoing, id)
            .filter(|rel| relationship.map_or(true, |t| rel.relationship == t))
            .filter_map(|rel| self.related(&rel.target_id, rel.relationship))
            .collect()
    }

    /// Requirement with its section, linked requirements in both directions
    /// and referenced process tables
    pub fn context(&self, id: &str) -> Option<RequirementContext> {
        let requirement = self.requirement(id)?.clone();
        let section = self.section(&requirement.section).cloned();

        let outgoing = self.related_requirements(id, None);

        let incoming = self
            .edges(&self.incoming, id)
            .filter_map(|rel| self.related(&rel.source_id, rel.relationship))
            .collect();

        let process_tables = self
            .edges(&self.outgoing, id)
            .filter(|rel| rel.relationship == RelationshipType::References)
            .filter_map(|rel| self.process_table(&rel.target_id).cloned())
            .collect();

        Some(RequirementContext {
            requirement,
            section,
            outgoing,
            incoming,
            process_tables,
        })
    }

    fn edges<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        id: &str,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        index
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.relationships[i])
    }

    fn related(&self, id: &str, relationship: RelationshipType) -> Option<RelatedRequirement> {
        self.requirement(id).map(|r| RelatedRequirement {
            id: r.id.clone(),
            text: r.text.clone(),
            relationship,
        })
    }
}

fn upsert<T>(items: &mut Vec<T>, index: &mut HashMap<String, usize>, key: String, item: T) {
    match index.get(&key) {
        Some(&i) => items[i] = item,
        None => {
            index.insert(key, items.len());
            items.push(item);
        }
    }
}
