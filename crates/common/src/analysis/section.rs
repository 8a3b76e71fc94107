//! Concurrent analysis of every populated requirement in a section

use super::analyzer::{AnalysisRequest, ComplianceAnalyzer};
use super::verdict::ComplianceVerdict;
use crate::errors::{AppError, Result};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// Shown when a failed analysis carries no usable message
pub const ANALYSIS_FAILED_FALLBACK: &str = "Analysis failed. Please try again.";

/// Where one requirement is in a section run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequirementState {
    Pending,
    InFlight,
    Completed { verdict: ComplianceVerdict },
    Failed { message: String },
}

impl RequirementState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Outcome of a section run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    pub states: BTreeMap<String, RequirementState>,
    /// Requirements left out because their evidence was blank
    pub skipped: Vec<String>,
}

impl SectionReport {
    pub fn verdicts(&self) -> impl Iterator<Item = &ComplianceVerdict> {
        self.states.values().filter_map(|state| match state {
            RequirementState::Completed { verdict } => Some(verdict),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, RequirementState::Failed { .. }))
            .count()
    }
}

/// Per-run state map, shared by the concurrent analyses of one request
#[derive(Debug, Default)]
pub struct SectionTracker {
    states: Mutex<BTreeMap<String, RequirementState>>,
}

impl SectionTracker {
    fn set(&self, requirement_id: &str, state: RequirementState) {
        tracing::debug!(requirement_id, state = ?state, "Section requirement state changed");
        if let Ok(mut states) = self.states.lock() {
            states.insert(requirement_id.to_string(), state);
        }
    }

    fn into_states(self) -> BTreeMap<String, RequirementState> {
        self.states.into_inner().unwrap_or_default()
    }
}

/// Message to show for a failed analysis
pub fn failure_message(error: &AppError) -> String {
    let message = error.user_message();
    if message.trim().is_empty() {
        ANALYSIS_FAILED_FALLBACK.to_string()
    } else {
        message
    }
}

impl ComplianceAnalyzer {
    /// Analyze every item with non-blank evidence.
    ///
    /// Each analysis starts after a random delay of up to `stagger_max`
    /// and all of them run concurrently. A failed item does not affect
    /// the others. Returns a validation error without any LLM call when
    /// no item has evidence.
    pub async fn analyze_section(
        &self,
        items: Vec<AnalysisRequest>,
        stagger_max: Duration,
    ) -> Result<SectionReport> {
        let mut skipped = Vec::new();
        let mut populated = Vec::new();
        let mut seen = HashSet::new();

        for mut item in items {
            item.requirement_id = item.requirement_id.trim().to_string();
            if item.requirement_id.is_empty() {
                return Err(AppError::MissingField {
                    field: "requirement_id".to_string(),
                });
            }
            if !seen.insert(item.requirement_id.clone()) {
                return Err(AppError::validation(
                    "items",
                    format!("Requirement {} appears more than once", item.requirement_id),
                ));
            }
            if item.has_evidence() {
                populated.push(item);
            } else {
                skipped.push(item.requirement_id);
            }
        }

        if populated.is_empty() {
            return Err(AppError::validation(
                "items",
                "Please provide evidence for at least one requirement",
            ));
        }

        let tracker = SectionTracker::default();
        for item in &populated {
            tracker.set(&item.requirement_id, RequirementState::Pending);
        }

        let max_ms = stagger_max.as_millis() as u64;
        let delays: Vec<Duration> = {
            let mut rng = rand::thread_rng();
            populated
                .iter()
                .map(|_| Duration::from_millis(rng.gen_range(0..=max_ms)))
                .collect()
        };

        tracing::info!(
            requirements = populated.len(),
            skipped = skipped.len(),
            "Starting section analysis"
        );

        let tracker_ref = &tracker;
        let runs = populated.iter().zip(delays).map(|(item, delay)| async move {
            tokio::time::sleep(delay).await;
            tracker_ref.set(&item.requirement_id, RequirementState::InFlight);
            let state = match self.analyze(item).await {
                Ok(verdict) => RequirementState::Completed { verdict },
                Err(e) => {
                    tracing::warn!(requirement_id = %item.requirement_id, error = %e, "Section requirement failed");
                    RequirementState::Failed { message: failure_message(&e) }
                }
            };
            tracker_ref.set(&item.requirement_id, state);
        });
        join_all(runs).await;

        Ok(SectionReport {
            states: tracker.into_states(),
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::analyzer::tests::{analyzer_with, CountingLlm};
    use super::*;
    use std::sync::Arc;

    fn item(id: &str, evidence: &str) -> AnalysisRequest {
        AnalysisRequest::new(id, evidence)
    }

    #[tokio::test]
    async fn test_no_evidence_means_no_calls() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let err = analyzer
            .analyze_section(vec![item("3.1", ""), item("3.2", "  ")], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(llm.count(), 0);
    }

    #[tokio::test]
    async fn test_one_call_per_populated_item() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let report = analyzer
            .analyze_section(
                vec![
                    item("3.1", "Thermocouples calibrated every 3 months, certificates on file"),
                    item("3.2", ""),
                    item("3.3", "SAT overdue"),
                ],
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        assert_eq!(llm.count(), 2);
        assert_eq!(report.skipped, vec!["3.2"]);
        assert_eq!(report.states.len(), 2);
        assert!(report.states.values().all(RequirementState::is_terminal));
        assert_eq!(report.verdicts().count(), 2);
        let sat = report.states.get("3.3").unwrap();
        assert!(matches!(sat, RequirementState::Completed { verdict } if !verdict.is_compliant()));
    }

    #[tokio::test]
    async fn test_failures_carry_upstream_message() {
        let llm = Arc::new(CountingLlm::failing("quota exceeded"));
        let analyzer = analyzer_with(llm.clone());

        let report = analyzer
            .analyze_section(vec![item("3.1", "a"), item("3.3", "b")], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(llm.count(), 2);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(
            report.states.get("3.1"),
            Some(&RequirementState::Failed { message: "quota exceeded".into() })
        );
    }

    #[tokio::test]
    async fn test_blank_upstream_message_uses_fallback() {
        let llm = Arc::new(CountingLlm::failing(""));
        let analyzer = analyzer_with(llm);

        let report = analyzer
            .analyze_section(vec![item("3.1", "a")], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            report.states.get("3.1"),
            Some(&RequirementState::Failed { message: ANALYSIS_FAILED_FALLBACK.into() })
        );
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let err = analyzer
            .analyze_section(vec![item("3.1", "a"), item(" 3.1 ", "b")], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(llm.count(), 0);
    }
}
