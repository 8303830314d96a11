use crate::config::LlmSettings;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a model request is for. Query generation runs deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmPurpose {
    TableSelection,
    QueryGeneration,
    AnswerComposition,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub purpose: LlmPurpose,
    pub prompt: String,
}

impl LlmRequest {
    pub fn new(purpose: LlmPurpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
        }
    }
}

/// Request/response contract for the language-model service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Text content of the model's reply
    async fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// OpenAI-compatible chat-completions client (plain or Azure deployment)
#[derive(Clone)]
pub struct LlmClient {
    settings: LlmSettings,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// o1-style reasoning deployments reject temperature and token caps
    fn is_reasoning_model(&self) -> bool {
        let model = self.settings.model.to_lowercase();
        model.contains("o1") || model.contains("mini")
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match &self.settings.azure_api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, self.settings.model, version
            ),
            None => format!("{}/chat/completions", base),
        }
    }

    fn build_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                {"role": "user", "content": request.prompt}
            ]
        });

        if !self.is_reasoning_model() {
            let temperature = match request.purpose {
                LlmPurpose::QueryGeneration => 0.0,
                _ => self.settings.temperature,
            };
            body["temperature"] = serde_json::json!(temperature);
            body["max_tokens"] = serde_json::json!(self.settings.max_tokens);
        }

        body
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Llm("No LLM API key configured".to_string()))?;

        debug!("Calling LLM ({:?}), prompt {} chars", request.purpose, request.prompt.len());

        let builder = self.http.post(self.endpoint()).json(&self.build_body(request));
        let builder = if self.settings.azure_api_version.is_some() {
            builder.header("api-key", api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", api_key))
        };

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            warn!("LLM API returned {}: {}", status, message);
            return Err(AgentError::Llm(format!("LLM API returned {}: {}", status, message)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Llm("No content in LLM response".to_string()))?;

        if content.trim().is_empty() {
            warn!("LLM returned empty content");
        }

        Ok(content.to_string())
    }
}

/// Remove Markdown code-fence wrapping (```json / ```sql / ```) from model output
pub fn strip_code_fences(text: &str) -> String {
    let mut cleaned = text.trim().to_string();
    for fence in ["```json", "```sql", "```SQL", "```"] {
        cleaned = cleaned.replace(fence, "");
    }
    cleaned.trim().to_string()
}
