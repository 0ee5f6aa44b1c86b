//! Clients for the text-generation service.
//!
//! [`ChartGenerator`] combines the prompt contract with a
//! [`TextGenerator`] backend and an optional bounded retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message, SystemContentBlock,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::config::{GenerationConfig, GenerationProvider};
use crate::models::{AiResponse, ChartRequest};
use crate::prompt::{build_user_prompt, parse_ai_response, PROMPT_VERSION, SYSTEM_PROMPT};
use crate::secrets::resolve_api_key;
use crate::{Error, Result};

/// Maximum tokens requested for one chart.
const MAX_OUTPUT_TOKENS: i32 = 2048;

/// A service that answers a system + user prompt with raw text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiGenerator {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAiGenerator {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: format!("Generation request failed: {}", e),
                code: None,
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), &body));
        }

        let completion: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Generation(format!("Unreadable completion: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::Generation("No content in generation response".to_string()))
    }
}

fn upstream_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => Error::Upstream {
            status,
            message: parsed.error.message,
            code: parsed.error.code.map(|code| match code {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        },
        Err(_) => Error::Upstream {
            status,
            message: body.chars().take(500).collect(),
            code: None,
        },
    }
}

/// Amazon Bedrock Converse client.
pub struct BedrockGenerator {
    client: aws_sdk_bedrockruntime::Client,
    model_id: String,
    temperature: f32,
}

impl BedrockGenerator {
    pub fn new(client: aws_sdk_bedrockruntime::Client, model_id: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for BedrockGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let message = Message::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(user.to_string()))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build Bedrock message: {}", e)))?;

        let response = self
            .client
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(system.to_string()))
            .messages(message)
            .inference_config(
                InferenceConfiguration::builder()
                    .temperature(self.temperature)
                    .max_tokens(MAX_OUTPUT_TOKENS)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: e.raw_response().map(|r| r.status().as_u16()).unwrap_or(0),
                message: format!("Bedrock converse failed: {}", DisplayErrorContext(&e)),
                code: None,
            })?;

        let text = response
            .output()
            .and_then(|output| output.as_message().ok())
            .map(|message| {
                message
                    .content()
                    .iter()
                    .filter_map(|block| block.as_text().ok())
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::Generation("No content in generation response".to_string()));
        }
        Ok(text)
    }
}

/// Bounded retry with exponential backoff for retryable upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// Delay before retry number `retry` (starting at 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Turns chart requests into parsed [`AiResponse`]s.
#[derive(Clone)]
pub struct ChartGenerator {
    backend: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
}

impl ChartGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Build the configured backend, resolving credentials as needed.
    pub async fn from_config(config: &GenerationConfig, aws_config: &aws_config::SdkConfig) -> Result<Self> {
        let backend: Arc<dyn TextGenerator> = match config.provider {
            GenerationProvider::OpenAi => {
                let source = config.api_key.as_ref().ok_or_else(|| {
                    Error::Config("No API key configured for the generation service".to_string())
                })?;
                let secrets_client = aws_sdk_secretsmanager::Client::new(aws_config);
                let api_key = resolve_api_key(&secrets_client, source).await?;
                Arc::new(OpenAiGenerator::new(
                    reqwest::Client::new(),
                    &config.base_url,
                    api_key,
                    &config.model,
                    config.temperature,
                ))
            }
            GenerationProvider::Bedrock => Arc::new(BedrockGenerator::new(
                aws_sdk_bedrockruntime::Client::new(aws_config),
                &config.model,
                config.temperature,
            )),
        };

        Ok(Self::new(
            backend,
            RetryPolicy::new(config.max_retries, Duration::from_millis(500)),
        ))
    }

    /// Generate a chart (or a clarification question) for a request.
    pub async fn generate(&self, request: &ChartRequest) -> Result<AiResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::Validation("query is required".to_string()));
        }
        request
            .validate()
            .map_err(|e| Error::Validation(format!("Invalid request: {}", e)))?;

        let user_prompt = build_user_prompt(&request.query, request.clarification_answer.as_deref());
        info!(
            "Generating chart (prompt v{}, clarified: {})",
            PROMPT_VERSION,
            request.clarification_answer.is_some()
        );

        let raw = self.complete_with_retry(&user_prompt).await?;
        parse_ai_response(&raw)
    }

    async fn complete_with_retry(&self, user_prompt: &str) -> Result<String> {
        let mut retry = 0;
        loop {
            match self.backend.complete(SYSTEM_PROMPT, user_prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!("Generation failed ({}); retry {} in {:?}", e, retry, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given errors first, then answers `reply`.
    struct ScriptedGenerator {
        failures: std::sync::Mutex<Vec<Error>>,
        reply: String,
        calls: AtomicU32,
    }

    impl ScriptedGenerator {
        fn new(failures: Vec<Error>, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                failures: std::sync::Mutex::new(failures),
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            assert_eq!(system, SYSTEM_PROMPT);
            assert!(!user.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.failures.lock().unwrap().pop();
            match next {
                Some(e) => Err(e),
                None => Ok(self.reply.clone()),
            }
        }
    }

    const CHART: &str = r#"{"needsClarification":false,"chartData":{"title":"T","chartType":"bar","labels":["a","b"],"values":[1,2]}}"#;

    fn request(query: &str) -> ChartRequest {
        ChartRequest { query: query.to_string(), clarification_answer: None }
    }

    fn rate_limited() -> Error {
        Error::Upstream { status: 429, message: "rate limited".into(), code: None }
    }

    #[tokio::test]
    async fn test_generate_parses_chart() {
        let backend = ScriptedGenerator::new(vec![], CHART);
        let generator = ChartGenerator::new(backend, RetryPolicy::none());
        let response = generator.generate(&request("compare a and b")).await.unwrap();
        assert_eq!(response.chart_data.unwrap().labels, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected_without_calling_upstream() {
        let backend = ScriptedGenerator::new(vec![], CHART);
        let generator = ChartGenerator::new(backend.clone(), RetryPolicy::none());
        assert!(matches!(generator.generate(&request("   ")).await, Err(Error::Validation(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let backend = ScriptedGenerator::new(vec![rate_limited()], CHART);
        let generator = ChartGenerator::new(backend.clone(), RetryPolicy::none());
        let err = generator.generate(&request("q")).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_retry_recovers() {
        let backend = ScriptedGenerator::new(vec![rate_limited(), rate_limited()], CHART);
        let generator = ChartGenerator::new(backend.clone(), RetryPolicy::new(2, Duration::from_millis(1)));
        assert!(generator.generate(&request("q")).await.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_failures_are_not_retried() {
        let backend = ScriptedGenerator::new(vec![], "not json");
        let generator = ChartGenerator::new(backend.clone(), RetryPolicy::new(3, Duration::from_millis(1)));
        assert!(matches!(generator.generate(&request("q")).await, Err(Error::Generation(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_upstream_error_body() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let err = upstream_error(401, body);
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.code(), "invalid_api_key");
        assert!(err.to_string().contains("Incorrect API key"));

        let err = upstream_error(503, "<html>Service Unavailable</html>");
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }
}
