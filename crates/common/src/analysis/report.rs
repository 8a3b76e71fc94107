//! Whole-form analysis: pick the relevant requirements for a document,
//! analyze each and summarize the result

use super::analyzer::{AnalysisRequest, ComplianceAnalyzer};
use super::prompt::{build_summary_prompt, SYSTEM_PROMPT};
use super::verdict::{Compliance, ComplianceVerdict};
use crate::errors::{AppError, Result};
use crate::knowledge::{FormType, KnowledgeStore, RequirementCriticality};
use crate::llm::CompletionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

const MAX_DEFAULT_REQUIREMENTS: usize = 5;

/// Longest document excerpt used as evidence for a requirement without
/// its own objective evidence
const MAX_EXCERPT_CHARS: usize = 6000;

pub const SUMMARY_FALLBACK_COMPLIANT: &str = "The form appears to be compliant with relevant CQI-9 \
     requirements. However, an error occurred during summary generation.";

pub const SUMMARY_FALLBACK_NON_COMPLIANT: &str = "The form appears to have compliance issues with \
     one or more CQI-9 requirements. Detailed review is recommended. Note: An error occurred \
     during summary generation.";

/// A processed document ready for analysis
#[derive(Debug, Clone, Default)]
pub struct FormEvidence {
    pub form_id: String,
    pub form_type: Option<FormType>,
    /// Objective evidence per requirement id, as parsed from the form
    pub evidence: BTreeMap<String, String>,
    /// Full extracted text
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormAnalysisReport {
    pub form_id: String,
    pub form_type: FormType,
    pub analysis_timestamp: DateTime<Utc>,
    pub overall_compliance: bool,
    pub overall_confidence: f64,
    pub findings: Vec<ComplianceVerdict>,
    pub summary: String,
}

/// True when `word` appears in `text` as a whole token (case-sensitive)
fn contains_token(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric()).any(|token| token == word)
}

fn matching(store: &KnowledgeStore, pred: impl Fn(&str, &str) -> bool) -> Vec<String> {
    store
        .requirements()
        .iter()
        .filter(|r| pred(&r.text, &r.text.to_lowercase()))
        .map(|r| r.id.clone())
        .collect()
}

/// Requirement ids worth checking for a document of the given type
pub fn relevant_requirements(store: &KnowledgeStore, form_type: FormType) -> Vec<String> {
    let mut ids = match form_type {
        FormType::TemperatureUniformitySurvey => matching(store, |text, lower| {
            lower.contains("temperature uniformity") || contains_token(text, "TUS")
        }),
        FormType::SystemAccuracyTest => matching(store, |text, lower| {
            lower.contains("system accuracy") || contains_token(text, "SAT")
        }),
        FormType::ThermocoupleCalibration => matching(store, |_, lower| {
            lower.contains("thermocouple") && lower.contains("calibration")
        }),
        _ => store
            .filter_requirements(None, Some(RequirementCriticality::High))
            .into_iter()
            .take(MAX_DEFAULT_REQUIREMENTS)
            .map(|r| r.id.clone())
            .collect(),
    };

    if ids.is_empty() {
        ids = store
            .sections()
            .iter()
            .filter_map(|s| store.section_requirements(&s.number).first().map(|r| r.id.clone()))
            .collect();
    }
    ids
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_EXCERPT_CHARS).collect()
}

/// Verdict recorded when the analysis of one requirement fails
fn failed_finding(requirement_id: &str, error: &AppError) -> ComplianceVerdict {
    ComplianceVerdict {
        requirement_id: requirement_id.to_string(),
        compliance: Compliance::NonCompliant,
        confidence: Some(0.0),
        explanation: format!("Error during analysis: {}", error.user_message()),
        recommendations: vec!["Review form data manually".to_string()],
        references: Vec::new(),
    }
}

impl ComplianceAnalyzer {
    /// Analyze a whole document against the requirements relevant to its type
    pub async fn analyze_form(&self, form: &FormEvidence) -> Result<FormAnalysisReport> {
        let form_type = form.form_type.unwrap_or(FormType::Unknown);
        let has_text = !form.text.trim().is_empty();
        if !has_text && form.evidence.values().all(|e| e.trim().is_empty()) {
            return Err(AppError::validation("document", "The document contains no text to analyze"));
        }

        // Requirements with parsed evidence come first, then the ones
        // relevant to the form type
        let mut requirement_ids: Vec<String> = form
            .evidence
            .iter()
            .filter(|(id, e)| !e.trim().is_empty() && self.knowledge().requirement(id).is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for id in relevant_requirements(self.knowledge(), form_type) {
            if !requirement_ids.contains(&id) {
                requirement_ids.push(id);
            }
        }

        tracing::info!(
            form_id = %form.form_id,
            form_type = %form_type,
            requirements = requirement_ids.len(),
            "Analyzing form"
        );

        let mut findings = Vec::with_capacity(requirement_ids.len());
        for id in &requirement_ids {
            let evidence = match form.evidence.get(id).filter(|e| !e.trim().is_empty()) {
                Some(evidence) => evidence.clone(),
                None if has_text => excerpt(&form.text),
                None => continue,
            };
            let request = AnalysisRequest::new(id.clone(), evidence);
            match self.analyze(&request).await {
                Ok(verdict) => findings.push(verdict),
                Err(e) => {
                    tracing::warn!(requirement_id = %id, error = %e, "Form requirement analysis failed");
                    findings.push(failed_finding(id, &e));
                }
            }
        }

        let overall_compliance = !findings.is_empty() && findings.iter().all(|f| f.is_compliant());
        let overall_confidence = if findings.is_empty() {
            0.0
        } else {
            findings.iter().map(|f| f.confidence.unwrap_or(0.0)).sum::<f64>() / findings.len() as f64
        };

        let summary = self.summarize(form_type, overall_compliance, &findings).await;

        Ok(FormAnalysisReport {
            form_id: form.form_id.clone(),
            form_type,
            analysis_timestamp: Utc::now(),
            overall_compliance,
            overall_confidence,
            findings,
            summary,
        })
    }

    async fn summarize(&self, form_type: FormType, overall: bool, findings: &[ComplianceVerdict]) -> String {
        let mut lines = String::new();
        for finding in findings {
            let _ = writeln!(
                lines,
                "- Requirement {}: {} (confidence {}). {}",
                finding.requirement_id,
                if finding.is_compliant() { "Compliant" } else { "Non-compliant" },
                finding
                    .confidence_percent()
                    .map(|p| format!("{:.0}%", p))
                    .unwrap_or_else(|| "n/a".to_string()),
                finding.explanation
            );
        }

        let request = CompletionRequest::new(build_summary_prompt(form_type.display_name(), overall, &lines))
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.options().summary_temperature)
            .with_max_tokens(self.options().max_tokens);

        match self.llm().complete(&request).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) | Err(_) => {
                tracing::warn!("Summary generation failed, using static summary");
                if overall {
                    SUMMARY_FALLBACK_COMPLIANT.to_string()
                } else {
                    SUMMARY_FALLBACK_NON_COMPLIANT.to_string()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::analyzer::tests::{analyzer_with, CountingLlm};
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_relevant_requirements_by_form_type() {
        let store = KnowledgeStore::bundled().unwrap();
        assert_eq!(relevant_requirements(&store, FormType::TemperatureUniformitySurvey), vec!["3.2"]);
        assert_eq!(relevant_requirements(&store, FormType::SystemAccuracyTest), vec!["3.3"]);
        assert!(relevant_requirements(&store, FormType::ThermocoupleCalibration).contains(&"3.1".to_string()));

        let default = relevant_requirements(&store, FormType::Unknown);
        assert_eq!(default.len(), MAX_DEFAULT_REQUIREMENTS);
        assert!(default
            .iter()
            .all(|id| store.requirement(id).unwrap().criticality == RequirementCriticality::High));
    }

    #[test]
    fn test_token_match_is_whole_word() {
        assert!(contains_token("Perform SAT quarterly", "SAT"));
        assert!(!contains_token("SATURATED salt bath", "SAT"));
    }

    #[tokio::test]
    async fn test_form_report() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let form = FormEvidence {
            form_id: "job-1".into(),
            form_type: Some(FormType::TemperatureUniformitySurvey),
            evidence: BTreeMap::from([("3.3".to_string(), "SAT missing for furnace 2".to_string())]),
            text: "Temperature uniformity survey for furnace 2, all readings within ±5 °C".into(),
        };
        let report = analyzer.analyze_form(&form).await.unwrap();

        let ids: Vec<_> = report.findings.iter().map(|f| f.requirement_id.as_str()).collect();
        assert_eq!(ids, vec!["3.3", "3.2"]);
        assert!(!report.overall_compliance);
        assert!((report.overall_confidence - 0.8).abs() < 1e-9);
        // two analyses plus the summary
        assert_eq!(llm.count(), 3);
        assert!(!report.summary.is_empty());
    }

    #[tokio::test]
    async fn test_failed_requirements_and_static_summary() {
        let llm = Arc::new(CountingLlm::failing("service down"));
        let analyzer = analyzer_with(llm);

        let form = FormEvidence {
            form_id: "job-2".into(),
            form_type: Some(FormType::SystemAccuracyTest),
            text: "SAT report".into(),
            ..Default::default()
        };
        let report = analyzer.analyze_form(&form).await.unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].explanation, "Error during analysis: service down");
        assert_eq!(report.overall_confidence, 0.0);
        assert_eq!(report.summary, SUMMARY_FALLBACK_NON_COMPLIANT);
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());
        let err = analyzer.analyze_form(&FormEvidence::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(llm.count(), 0);
    }
}
