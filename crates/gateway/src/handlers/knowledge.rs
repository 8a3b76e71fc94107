//! CQI-9 requirement lookup handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use cqi9_common::{
    errors::{AppError, Result},
    knowledge::{Requirement, RequirementContext, RequirementCriticality, Section},
};

#[derive(Debug, Default, Deserialize)]
pub struct RequirementFilter {
    pub section: Option<String>,
    pub criticality: Option<String>,
    /// Case-insensitive keywords, comma separated
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct RequirementList {
    pub sections: Vec<Section>,
    pub requirements: Vec<Requirement>,
    pub total: usize,
}

/// Requirements, optionally filtered by section, criticality and keywords
pub async fn list_requirements(
    State(state): State<AppState>,
    Query(filter): Query<RequirementFilter>,
) -> Result<Json<RequirementList>> {
    let criticality = match filter.criticality.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(value) => Some(RequirementCriticality::parse(value).ok_or_else(|| {
            AppError::validation("criticality", format!("Unknown criticality: {}", value))
        })?),
        None => None,
    };
    let section = filter.section.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let mut requirements = state.knowledge.filter_requirements(section, criticality);

    if let Some(q) = filter.q.as_deref() {
        let keywords: Vec<&str> = q.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
        if !keywords.is_empty() {
            let hits: Vec<&str> = state
                .knowledge
                .search(&keywords)
                .into_iter()
                .map(|r| r.id.as_str())
                .collect();
            requirements.retain(|r| hits.contains(&r.id.as_str()));
        }
    }

    let requirements: Vec<Requirement> = requirements.into_iter().cloned().collect();
    let sections = state
        .knowledge
        .sections()
        .iter()
        .filter(|s| section.map_or(true, |n| s.number == n))
        .cloned()
        .collect();

    Ok(Json(RequirementList {
        total: requirements.len(),
        sections,
        requirements,
    }))
}

/// A requirement with its section, related requirements and process tables
pub async fn get_requirement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RequirementContext>> {
    state
        .knowledge
        .context(&id)
        .map(Json)
        .ok_or(AppError::RequirementNotFound { id })
}
