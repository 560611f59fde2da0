//! Anthropic Messages API Adapter
//!
//! Primary backend adapter. Supports extended thinking and native document
//! input blocks.
//!
//! Note: Retry logic lives in the RetryingInvoker; this adapter performs
//! single-shot execution only and classifies failures at the boundary.

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

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter with secure API key handling
pub struct AnthropicAdapter {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    counter: TokenCounter,
    limits: ProviderLimits,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(config: &BackendConfig, profile: &ModelProfile) -> Result<Self> {
        let api_key_str = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                ForgeError::Config(
                    "Anthropic API key not found. Set ANTHROPIC_API_KEY env var or provide in config"
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
            counter: TokenCounter::for_backend("anthropic"),
            limits: ProviderLimits {
                max_context_tokens: profile.max_context_tokens,
                supports_extended_thinking: true,
                supports_native_document: true,
            },
            client,
        })
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        thinking_budget: Option<u32>,
    ) -> std::result::Result<Generation, BackendError> {
        let start_time = Instant::now();
        let url = format!("{}/v1/messages", self.api_base);

        // Extended thinking spends hidden tokens inside max_tokens, so the
        // ceiling has to cover both the budget and the visible output
        let max_tokens = match thinking_budget {
            Some(budget) => request.max_output_tokens.saturating_add(budget),
            None => request.max_output_tokens,
        };

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            temperature: self.temperature,
            system: request.system_prompt.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.user_prompt.clone(),
            }],
            thinking: thinking_budget.map(|budget_tokens| Thinking {
                thinking_type: "enabled".to_string(),
                budget_tokens,
            }),
        };

        debug!("Sending request to Anthropic Messages API");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, "anthropic"))?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status, &body, "anthropic",
            ));
        }

        let response_body: MessagesResponse = response.json().await.map_err(|e| {
            BackendError::with_backend(
                ErrorKind::BackendInternal,
                format!("Failed to parse Anthropic response: {}", e),
                "anthropic",
            )
        })?;

        // Thinking blocks are internal; only text blocks carry output
        let text: String = response_body
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if text.is_empty() {
            return Err(BackendError::with_backend(
                ErrorKind::BackendInternal,
                "No text content in Anthropic response",
                "anthropic",
            ));
        }

        let usage = match response_body.usage {
            Some(usage) => TokenUsage::new(usage.input_tokens, usage.output_tokens),
            None => self.estimate_usage(request, &text),
        };

        Ok(Generation {
            text,
            usage,
            model_id: self.model.clone(),
            backend_id: "anthropic".to_string(),
            api_ms: Some(elapsed.as_millis() as u64),
        })
    }

    /// Usage fallback when the backend omits token accounting
    fn estimate_usage(&self, request: &GenerationRequest, output: &str) -> TokenUsage {
        let input = self.counter.count(&request.system_prompt).tokens
            + self.counter.count(&request.user_prompt).tokens;
        TokenUsage::new(input, self.counter.count(output).tokens)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, BackendError> {
        info!(
            "Generating with Anthropic (model: {}, temperature: {})",
            self.model, self.temperature
        );
        self.execute(request, None).await
    }

    async fn generate_extended(
        &self,
        request: &GenerationRequest,
        thinking_budget: u32,
    ) -> std::result::Result<Generation, BackendError> {
        info!(
            "Generating with Anthropic extended thinking (model: {}, budget: {})",
            self.model, thinking_budget
        );
        self.execute(request, Some(thinking_budget)).await
    }

    fn count_tokens(&self, text: &str) -> TokenCount {
        self.counter.count(text)
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    fn backend_id(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> AnthropicAdapter {
        let config = BackendConfig {
            backend: "anthropic".to_string(),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };
        AnthropicAdapter::new(&config, &ModelProfile::builtin("claude-sonnet-4-20250514"))
            .expect("adapter")
    }

    #[test]
    fn test_limits_advertise_capabilities() {
        let adapter = test_adapter();
        let limits = adapter.limits();
        assert_eq!(limits.max_context_tokens, 200_000);
        assert!(limits.supports_extended_thinking);
        assert!(limits.supports_native_document);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let adapter = test_adapter();
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("test-key"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_thinking_block_serialization() {
        let body = MessagesRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8_192,
            temperature: 0.0,
            system: "sys".to_string(),
            messages: vec![],
            thinking: Some(Thinking {
                thinking_type: "enabled".to_string(),
                budget_tokens: 4_096,
            }),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["thinking"]["type"], "enabled");
        assert_eq!(json["thinking"]["budget_tokens"], 4_096);

        let without = MessagesRequest {
            thinking: None,
            ..body
        };
        let json = serde_json::to_value(&without).expect("serialize");
        assert!(json.get("thinking").is_none());
    }

    #[test]
    fn test_response_text_extraction_skips_thinking() {
        let raw = serde_json::json!({
            "content": [
                {"type": "thinking", "thinking": "hidden reasoning"},
                {"type": "text", "text": "The report body."}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 40}
        });
        let parsed: MessagesResponse = serde_json::from_value(raw).expect("parse");
        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "The report body.");
    }

    #[test]
    fn test_usage_estimation_fallback() {
        let adapter = test_adapter();
        let request = GenerationRequest {
            document_text: "doc".to_string(),
            system_prompt: "You summarize evidence.".to_string(),
            user_prompt: "Summarize: doc".to_string(),
            model_id: adapter.model_id().to_string(),
            temperature: 0.0,
            max_output_tokens: 100,
            thinking_budget: None,
        };
        let usage = adapter.estimate_usage(&request, "A short summary.");
        assert!(usage.input_tokens > 0);
        assert!(usage.output_tokens > 0);
    }
}
