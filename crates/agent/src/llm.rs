use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use sizer_core::config::LlmConfig;
use sizer_core::domain::calculation::{ParameterSet, SizingResult};
use sizer_core::domain::service::FlowKind;

use crate::adjustment::AdjustmentRejection;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible `chat/completions` client (OpenRouter, OpenAI, Ollama).
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
}

impl ChatCompletionsClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.effective_base_url().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        })
    }

    async fn send_once(&self, body: &Value) -> Result<String> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("model API error {status}: {error_text}"));
        }

        let raw = response.json::<Value>().await?;
        extract_content(&raw)
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.body(request);
        debug!(event_name = "llm.request", model = %self.model, endpoint = %self.endpoint);

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(content) => return Ok(content),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(event_name = "llm.retry", attempt, error = %error);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn extract_content(raw: &Value) -> Result<String> {
    raw["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("no message content in model response"))
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentRequest {
    pub flow: FlowKind,
    pub parameters: ParameterSet,
    pub base: SizingResult,
    pub conditions: String,
}

/// Unvalidated model output.
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentProposal {
    pub adjusted_result: Value,
    pub comment: String,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AdjustmentError {
    #[error("adjustment model is not configured")]
    NotConfigured,
    #[error("adjustment model unavailable: {0}")]
    Unavailable(String),
    #[error("adjustment model timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("adjusted result rejected: {0}")]
    Rejected(#[from] AdjustmentRejection),
}

impl AdjustmentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Malformed(_) => "malformed",
            Self::Rejected(_) => "rejected",
        }
    }
}

#[async_trait]
pub trait AdjustmentModel: Send + Sync {
    async fn propose(
        &self,
        request: &AdjustmentRequest,
    ) -> Result<AdjustmentProposal, AdjustmentError>;
}

const SYSTEM_PROMPT: &str = r#"You are an expert infrastructure sizing consultant. Your task is to analyze additional requirements and adjust resource calculations.

CRITICAL RULES:
1. Return ONLY valid JSON, no markdown, no explanations outside JSON
2. JSON must have exactly two keys: "adjusted_result" and "comment"
3. "adjusted_result" must have IDENTICAL structure to base_result with adjusted numerical values
4. Keep every value's type: integers stay integers, decimals stay decimals, text stays text
5. "comment" must be in Russian and explain changes
6. Only adjust if there's a clear technical reason based on the conditions
7. Be conservative: adjust by 20-50% for most cases, not 2-5x
8. Never return negative values or zeros for resource counts
9. If no adjustment needed, return original values with comment explaining why

Example response format:
{
  "adjusted_result": {
    "brokers_count": 5,
    "storage_needed_gb": 1200.5,
    "ram_per_broker_gb": 16
  },
  "comment": "Увеличено количество брокеров с 3 до 5 для обеспечения высокой доступности согласно требованию о 99.99% uptime"
}"#;

pub struct LlmAdjustmentModel {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmAdjustmentModel {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn prompt(request: &AdjustmentRequest) -> Result<CompletionRequest, AdjustmentError> {
        let parameters = serde_json::to_string_pretty(&request.parameters)
            .map_err(|error| AdjustmentError::Malformed(error.to_string()))?;
        let base = serde_json::to_string_pretty(&request.base.to_json())
            .map_err(|error| AdjustmentError::Malformed(error.to_string()))?;

        let user = format!(
            "Analyze infrastructure sizing adjustment request.\n\n\
             Service: {flow}\n\n\
             Current Configuration:\n{parameters}\n\n\
             Calculated Resources:\n{base}\n\n\
             User Requirements:\n{conditions}\n\n\
             Consider:\n\
             - High availability and redundancy needs\n\
             - Performance requirements (throughput, latency, IOPS)\n\
             - Compliance and security requirements\n\
             - Scaling and growth expectations\n\
             - Cost optimization vs reliability trade-offs\n\n\
             Return JSON with adjusted values and explanation in Russian.",
            flow = request.flow,
            conditions = request.conditions,
        );

        Ok(CompletionRequest { system: SYSTEM_PROMPT.to_owned(), user })
    }
}

#[async_trait]
impl AdjustmentModel for LlmAdjustmentModel {
    async fn propose(
        &self,
        request: &AdjustmentRequest,
    ) -> Result<AdjustmentProposal, AdjustmentError> {
        let prompt = Self::prompt(request)?;
        let content = tokio::time::timeout(self.timeout, self.client.complete(&prompt))
            .await
            .map_err(|_| AdjustmentError::Timeout(self.timeout))?
            .map_err(|error| AdjustmentError::Unavailable(error.to_string()))?;

        parse_proposal(&content)
    }
}

/// Parses `{"adjusted_result": {...}, "comment": "..."}`, tolerating a markdown fence.
pub fn parse_proposal(content: &str) -> Result<AdjustmentProposal, AdjustmentError> {
    let parsed: Value = serde_json::from_str(strip_fences(content))
        .map_err(|error| AdjustmentError::Malformed(format!("invalid JSON: {error}")))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| AdjustmentError::Malformed("response is not a JSON object".to_owned()))?;

    if object.len() != 2 {
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        return Err(AdjustmentError::Malformed(format!(
            "expected exactly `adjusted_result` and `comment`, got {keys:?}"
        )));
    }
    let adjusted_result = object
        .get("adjusted_result")
        .cloned()
        .ok_or_else(|| AdjustmentError::Malformed("missing `adjusted_result`".to_owned()))?;
    let comment = object
        .get("comment")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AdjustmentError::Malformed("missing string `comment`".to_owned()))?;

    Ok(AdjustmentProposal { adjusted_result, comment })
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
