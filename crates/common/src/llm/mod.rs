//! LLM client abstraction
//!
//! Provides a unified interface over chat-completion providers:
//! - Any OpenAI-compatible API (DeepSeek by default)
//! - A deterministic mock for development and tests

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.1,
            max_tokens: 4000,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Trait for text completion
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the assistant message
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// True when backed by a real provider
    fn is_configured(&self) -> bool;

    /// Minimal round trip used by the status endpoint
    async fn health_check(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let request = CompletionRequest::new("Hello")
            .with_temperature(0.0)
            .with_max_tokens(5);
        match self.complete(&request).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "LLM health check failed");
                false
            }
        }
    }
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    message: String,
}

impl ChatCompletionClient {
    /// Create a new client
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn make_request(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: &request.prompt });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: if e.is_timeout() {
                    "LLM request timed out".to_string()
                } else {
                    format!("LLM request failed: {}", e)
                },
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // Prefer the provider's own message when it sends one
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("LLM API error {}: {}", status, body));
            return Err(AppError::LlmError { message });
        }

        let result: ChatResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.make_request(request).await;
        let elapsed = start.elapsed();

        crate::metrics::record_llm(elapsed.as_secs_f64(), &self.model, result.is_ok());

        match &result {
            Ok(content) => tracing::debug!(
                model = %self.model,
                duration_ms = elapsed.as_millis() as u64,
                response_chars = content.len(),
                "LLM completion finished"
            ),
            Err(e) => tracing::warn!(
                model = %self.model,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "LLM completion failed"
            ),
        }

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Deterministic offline client.
///
/// Compliance prompts get a JSON verdict that is negative when the
/// evidence mentions a gap ("missing", "expired", "not"...), structured
/// extraction prompts get an empty object, anything else an echo.
pub struct MockLlmClient;

const NEGATIVE_MARKERS: &[&str] = &[
    "no", "not", "none", "missing", "expired", "overdue", "fail", "failed", "absent", "lacking",
];

impl MockLlmClient {
    pub fn new() -> Self {
        Self
    }

    fn verdict_for(evidence: &str) -> String {
        let lower = evidence.to_lowercase();
        let negative = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| NEGATIVE_MARKERS.contains(&word));

        let verdict = if negative {
            serde_json::json!({
                "compliant": false,
                "confidence": 0.75,
                "explanation": "The evidence indicates a gap against the requirement.",
                "recommendations": ["Provide records demonstrating the requirement is met."],
                "references": []
            })
        } else {
            serde_json::json!({
                "compliant": true,
                "confidence": 0.85,
                "explanation": "The evidence addresses the requirement.",
                "recommendations": [],
                "references": []
            })
        };
        verdict.to_string()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if let Some(evidence) = tagged(&request.prompt, "evidence") {
            return Ok(Self::verdict_for(evidence));
        }
        if tagged(&request.prompt, "document").is_some() && request.prompt.contains("JSON") {
            return Ok("{}".to_string());
        }
        let preview: String = request.prompt.chars().take(200).collect();
        Ok(format!("[Mock response - LLM API key not configured]\n\n{}", preview))
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Content between `<tag>` and `</tag>`
pub fn tagged<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(text[start..end].trim())
}

/// The outermost JSON object in an LLM reply, ignoring Markdown fences
/// and any prose around it
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (end > start).then(|| &unfenced[start..=end])
}

/// Create an LLM client based on configuration.
///
/// A provider without an API key degrades to the mock client with a
/// warning so the portal stays usable offline.
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" | "deepseek" => match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                tracing::info!(model = %config.model, base = %config.api_base, "Using chat completions LLM");
                Ok(Arc::new(ChatCompletionClient::new(config, key.to_string())?))
            }
            _ => {
                tracing::warn!("LLM API key not configured, using mock LLM");
                Ok(Arc::new(MockLlmClient::new()))
            }
        },
        "mock" => Ok(Arc::new(MockLlmClient::new())),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider, using mock");
            Ok(Arc::new(MockLlmClient::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(
            extract_json_object("Here you go: {\"a\": {\"b\": 2}} thanks"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_tagged() {
        let prompt = "Requirement...\n<evidence>\n TUS report dated 2024-01-10 \n</evidence>\n";
        assert_eq!(tagged(prompt, "evidence"), Some("TUS report dated 2024-01-10"));
        assert_eq!(tagged(prompt, "document"), None);
    }

    #[tokio::test]
    async fn test_mock_verdicts() {
        let client = MockLlmClient::new();

        let ok = client
            .complete(&CompletionRequest::new("<evidence>Calibration certificates on file</evidence>"))
            .await
            .unwrap();
        let ok: serde_json::Value = serde_json::from_str(&ok).unwrap();
        assert_eq!(ok["compliant"], true);

        let gap = client
            .complete(&CompletionRequest::new("<evidence>Certificate expired in March</evidence>"))
            .await
            .unwrap();
        let gap: serde_json::Value = serde_json::from_str(&gap).unwrap();
        assert_eq!(gap["compliant"], false);
    }

    #[tokio::test]
    async fn test_mock_is_not_healthy() {
        assert!(!MockLlmClient::new().health_check().await);
    }

    #[test]
    fn test_factory_falls_back_to_mock() {
        let config = LlmConfig::default();
        let client = create_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "mock-llm");

        let config = LlmConfig { api_key: Some("sk-test".into()), ..LlmConfig::default() };
        let client = create_llm_client(&config).unwrap();
        assert!(client.is_configured());
        assert_eq!(client.model_name(), "deepseek-chat");
    }
}
