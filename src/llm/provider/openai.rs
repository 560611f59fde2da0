//! OpenAI Chat Completions Adapter
//!
//! Backend adapter using OpenAI's Chat Completions API.
//! Extended thinking is not offered through this surface; the trait default
//! refuses it rather than downgrading.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Generation, ProviderAdapter, ProviderLimits};
use crate::config::{BackendConfig, ModelProfile};
use crate::llm::token_counter::{TokenCount, TokenCounter};
use crate::types::{
    BackendError, ErrorClassifier, ErrorKind, ForgeError, GenerationRequest, Result, TokenUsage,
};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI Chat Completions adapter with secure API key handling
pub struct OpenAiAdapter {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    counter: TokenCounter,
    limits: ProviderLimits,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(config: &BackendConfig, profile: &ModelProfile) -> Result<Self> {
        let api_key_str = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                ForgeError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY env var or provide in config"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(
                crate::constants::network::CONNECTION_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| ForgeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model,
            temperature: config.temperature,
            counter: TokenCounter::for_backend("openai"),
            limits: ProviderLimits {
                max_context_tokens: profile.max_context_tokens,
                supports_extended_thinking: false,
                supports_native_document: false,
            },
            client,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_prompt.clone(),
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(request.max_output_tokens),
        }
    }

    /// Usage fallback when the backend omits token accounting
    fn estimate_usage(&self, request: &GenerationRequest, output: &str) -> TokenUsage {
        let input = self.counter.count(&request.system_prompt).tokens
            + self.counter.count(&request.user_prompt).tokens;
        TokenUsage::new(input, self.counter.count(output).tokens)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, BackendError> {
        info!(
            "Generating with OpenAI (model: {}, temperature: {})",
            self.model, self.temperature
        );

        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        debug!("Sending request to OpenAI API");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, "openai"))?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status, &body, "openai",
            ));
        }

        let response_body: ChatCompletionResponse = response.json().await.map_err(|e| {
            BackendError::with_backend(
                ErrorKind::BackendInternal,
                format!("Failed to parse OpenAI response: {}", e),
                "openai",
            )
        })?;

        let text = response_body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                BackendError::with_backend(
                    ErrorKind::BackendInternal,
                    "No content in OpenAI response",
                    "openai",
                )
            })?;

        let usage = match response_body.usage {
            Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            None => self.estimate_usage(request, &text),
        };

        Ok(Generation {
            text,
            usage,
            model_id: self.model.clone(),
            backend_id: "openai".to_string(),
            api_ms: Some(elapsed.as_millis() as u64),
        })
    }

    fn count_tokens(&self, text: &str) -> TokenCount {
        self.counter.count(text)
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    fn backend_id(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> OpenAiAdapter {
        let config = BackendConfig {
            backend: "openai".to_string(),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };
        OpenAiAdapter::new(&config, &ModelProfile::builtin("gpt-4o")).expect("adapter")
    }

    #[tokio::test]
    async fn test_extended_thinking_is_refused() {
        let adapter = test_adapter();
        let request = GenerationRequest {
            document_text: "doc".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "prompt".to_string(),
            model_id: "gpt-4o".to_string(),
            temperature: 0.0,
            max_output_tokens: 100,
            thinking_budget: Some(1_000),
        };

        let err = adapter
            .generate_extended(&request, 1_000)
            .await
            .expect_err("must refuse");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(err.message.contains("not supported"));
    }

    #[test]
    fn test_limits_advertise_capabilities() {
        let adapter = test_adapter();
        let limits = adapter.limits();
        assert_eq!(limits.max_context_tokens, 128_000);
        assert!(!limits.supports_extended_thinking);
        assert!(!limits.supports_native_document);
    }

    #[test]
    fn test_request_carries_both_prompts() {
        let adapter = test_adapter();
        let request = GenerationRequest {
            document_text: "doc".to_string(),
            system_prompt: "You draft reports.".to_string(),
            user_prompt: "Draft from: doc".to_string(),
            model_id: "gpt-4o".to_string(),
            temperature: 0.0,
            max_output_tokens: 256,
            thinking_budget: None,
        };

        let body = adapter.build_request(&request);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[0].content, "You draft reports.");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.max_tokens, Some(256));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let adapter = test_adapter();
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("test-key"));
        assert!(debug.contains("REDACTED"));
    }
}
