//! Single requirement/evidence analysis

use super::prompt::{build_analysis_prompt, SYSTEM_PROMPT};
use super::verdict::{parse_verdict, ComplianceVerdict};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::knowledge::KnowledgeStore;
use crate::llm::{CompletionRequest, LlmClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One requirement/evidence pair to analyze
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub requirement_id: String,
    /// Requirement text as shown to the auditor; looked up by id when absent
    #[serde(default, alias = "requirement")]
    pub requirement_text: Option<String>,
    #[serde(default)]
    pub evidence: String,
}

impl AnalysisRequest {
    pub fn new(requirement_id: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            requirement_text: None,
            evidence: evidence.into(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.requirement_text = Some(text.into());
        self
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence.trim().is_empty()
    }
}

/// Sampling settings for analysis calls
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub temperature: f32,
    pub summary_temperature: f32,
    pub max_tokens: u32,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for AnalyzerOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.analysis_temperature,
            summary_temperature: config.query_temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Turns requirement/evidence pairs into compliance verdicts
#[derive(Clone)]
pub struct ComplianceAnalyzer {
    llm: Arc<dyn LlmClient>,
    knowledge: Arc<KnowledgeStore>,
    options: AnalyzerOptions,
}

impl ComplianceAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>, knowledge: Arc<KnowledgeStore>, options: AnalyzerOptions) -> Self {
        Self { llm, knowledge, options }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn options(&self) -> AnalyzerOptions {
        self.options
    }

    /// Analyze one requirement against its evidence.
    ///
    /// Blank evidence is rejected without contacting the LLM. LLM failures
    /// are returned as-is; replies that cannot be parsed still produce a
    /// (non-compliant) verdict.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<ComplianceVerdict> {
        let requirement_id = request.requirement_id.trim();
        if requirement_id.is_empty() {
            return Err(AppError::MissingField {
                field: "requirement_id".to_string(),
            });
        }
        if !request.has_evidence() {
            return Err(AppError::validation(
                "evidence",
                "Please provide objective evidence before analyzing",
            ));
        }

        let context = self.knowledge.context(requirement_id);
        let requirement_text = match request.requirement_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => context
                .as_ref()
                .map(|ctx| ctx.requirement.text.clone())
                .ok_or_else(|| AppError::RequirementNotFound {
                    id: requirement_id.to_string(),
                })?,
        };

        let prompt = build_analysis_prompt(
            requirement_id,
            &requirement_text,
            context.as_ref(),
            &request.evidence,
        );
        let completion = CompletionRequest::new(prompt)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.options.temperature)
            .with_max_tokens(self.options.max_tokens);

        let start = Instant::now();
        let reply = self.llm.complete(&completion).await?;
        let verdict = parse_verdict(requirement_id, &reply);

        crate::metrics::record_analysis(verdict.compliance.as_str());
        tracing::info!(
            requirement_id,
            compliance = verdict.compliance.as_str(),
            confidence = ?verdict.confidence,
            duration_ms = start.elapsed().as_millis() as u64,
            "Requirement analyzed"
        );

        Ok(verdict)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock that counts calls and can be told to fail
    pub(crate) struct CountingLlm {
        pub calls: AtomicUsize,
        pub fail_with: Option<String>,
        inner: MockLlmClient,
    }

    impl CountingLlm {
        pub fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail_with: None, inner: MockLlmClient::new() }
        }

        pub fn failing(message: &str) -> Self {
            Self { fail_with: Some(message.to_string()), ..Self::new() }
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(message) => Err(AppError::LlmError { message: message.clone() }),
                None => self.inner.complete(request).await,
            }
        }

        fn model_name(&self) -> &str {
            "counting-mock"
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    pub(crate) fn analyzer_with(llm: Arc<CountingLlm>) -> ComplianceAnalyzer {
        let store = Arc::new(KnowledgeStore::bundled().unwrap());
        ComplianceAnalyzer::new(llm, store, AnalyzerOptions::default())
    }

    #[tokio::test]
    async fn test_blank_evidence_never_calls_llm() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let err = analyzer.analyze(&AnalysisRequest::new("3.2", "   \n\t")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(llm.count(), 0);
    }

    #[tokio::test]
    async fn test_verdict_from_evidence() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let verdict = analyzer
            .analyze(&AnalysisRequest::new("3.2", "Quarterly TUS reports for furnace F-3 within ±5 °C"))
            .await
            .unwrap();
        assert!(verdict.is_compliant());
        assert!(!verdict.explanation.is_empty());
        assert_eq!(llm.count(), 1);

        let verdict = analyzer
            .analyze(&AnalysisRequest::new("3.2", "Survey overdue since March").with_text("Custom text"))
            .await
            .unwrap();
        assert!(!verdict.is_compliant());
        assert_eq!(llm.count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_requirement_without_text() {
        let llm = Arc::new(CountingLlm::new());
        let analyzer = analyzer_with(llm.clone());

        let err = analyzer.analyze(&AnalysisRequest::new("99.9", "Some evidence")).await.unwrap_err();
        assert!(matches!(err, AppError::RequirementNotFound { .. }));
        assert_eq!(llm.count(), 0);

        let verdict = analyzer
            .analyze(&AnalysisRequest::new("99.9", "Some evidence").with_text("Ad hoc requirement"))
            .await
            .unwrap();
        assert_eq!(verdict.requirement_id, "99.9");
    }

    #[tokio::test]
    async fn test_upstream_message_is_kept() {
        let llm = Arc::new(CountingLlm::failing("x"));
        let analyzer = analyzer_with(llm.clone());

        let err = analyzer.analyze(&AnalysisRequest::new("3.2", "evidence")).await.unwrap_err();
        assert_eq!(err.user_message(), "x");
        assert_eq!(llm.count(), 1);
    }
}
