//! Ollama Local LLM Adapter
//!
//! Backend adapter for locally-running Ollama models.
//! Token usage is estimated when the local runtime omits its counters.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Generation, ProviderAdapter, ProviderLimits};
use crate::config::{BackendConfig, ModelProfile};
use crate::llm::token_counter::{TokenCount, TokenCounter};
use crate::types::{
    BackendError, ErrorClassifier, ErrorKind, ForgeError, GenerationRequest, Result, TokenUsage,
};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

/// Ollama local LLM adapter
pub struct OllamaAdapter {
    api_base: String,
    model: String,
    temperature: f32,
    counter: TokenCounter,
    limits: ProviderLimits,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(config: &BackendConfig, profile: &ModelProfile) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        // Validate endpoint URL for security (SSRF prevention)
        let api_base = Self::validate_endpoint(&api_base)?;

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
            api_base,
            model,
            temperature: config.temperature,
            counter: TokenCounter::for_backend("ollama"),
            limits: ProviderLimits {
                max_context_tokens: profile.max_context_tokens,
                supports_extended_thinking: false,
                supports_native_document: false,
            },
            client,
        })
    }

    /// Validate endpoint URL for security (SSRF prevention)
    ///
    /// Only allows http/https schemes and warns for non-localhost endpoints.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            ForgeError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ForgeError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "::1")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        // Remove trailing slash for consistency
        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    /// Usage fallback when the local runtime omits its counters
    fn estimate_usage(&self, request: &GenerationRequest, output: &str) -> TokenUsage {
        let input = self.counter.count(&request.system_prompt).tokens
            + self.counter.count(&request.user_prompt).tokens;
        TokenUsage::new(input, self.counter.count(output).tokens)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, BackendError> {
        info!(
            "Generating with Ollama (model: {}, temperature: {})",
            self.model, self.temperature
        );

        let start_time = Instant::now();
        let body = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: request.user_prompt.clone(),
                },
            ],
            stream: false,
            options: Some(OllamaOptions {
                temperature: self.temperature,
                num_predict: request.max_output_tokens,
            }),
        };
        let url = format!("{}/api/chat", self.api_base);

        debug!("Sending request to Ollama API");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::with_backend(
                        ErrorKind::TransientNetwork,
                        format!(
                            "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                            self.api_base
                        ),
                        "ollama",
                    )
                } else {
                    ErrorClassifier::classify_transport(&e, "ollama")
                }
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status, &body, "ollama",
            ));
        }

        let response_body: OllamaChatResponse = response.json().await.map_err(|e| {
            BackendError::with_backend(
                ErrorKind::BackendInternal,
                format!("Failed to parse Ollama response: {}", e),
                "ollama",
            )
        })?;

        let text = response_body.message.content;
        if text.is_empty() {
            return Err(BackendError::with_backend(
                ErrorKind::BackendInternal,
                "Empty response from Ollama",
                "ollama",
            ));
        }

        let usage = match (response_body.prompt_eval_count, response_body.eval_count) {
            (Some(input), Some(output)) => TokenUsage::new(input, output),
            _ => self.estimate_usage(request, &text),
        };

        Ok(Generation {
            text,
            usage,
            model_id: self.model.clone(),
            backend_id: "ollama".to_string(),
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
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> OllamaAdapter {
        let config = BackendConfig {
            backend: "ollama".to_string(),
            ..Default::default()
        };
        OllamaAdapter::new(&config, &ModelProfile::builtin("llama3:latest")).expect("adapter")
    }

    #[test]
    fn test_validate_endpoint_accepts_http() {
        assert!(OllamaAdapter::validate_endpoint("http://localhost:11434").is_ok());
        assert!(OllamaAdapter::validate_endpoint("https://127.0.0.1:11434").is_ok());
    }

    #[test]
    fn test_validate_endpoint_rejects_other_schemes() {
        assert!(OllamaAdapter::validate_endpoint("file:///etc/passwd").is_err());
        assert!(OllamaAdapter::validate_endpoint("ftp://host").is_err());
        assert!(OllamaAdapter::validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_validate_endpoint_strips_trailing_slash() {
        let validated = OllamaAdapter::validate_endpoint("http://localhost:11434/").expect("valid");
        assert!(!validated.ends_with('/'));
    }

    #[test]
    fn test_limits_advertise_capabilities() {
        let adapter = test_adapter();
        let limits = adapter.limits();
        assert!(!limits.supports_extended_thinking);
        assert!(!limits.supports_native_document);
        assert_eq!(limits.max_context_tokens, 32_768);
    }

    #[tokio::test]
    async fn test_extended_thinking_is_refused() {
        let adapter = test_adapter();
        let request = GenerationRequest {
            document_text: "doc".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "prompt".to_string(),
            model_id: "llama3:latest".to_string(),
            temperature: 0.0,
            max_output_tokens: 100,
            thinking_budget: Some(500),
        };

        let err = adapter
            .generate_extended(&request, 500)
            .await
            .expect_err("must refuse");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_usage_estimated_when_counters_missing() {
        let adapter = test_adapter();
        let request = GenerationRequest {
            document_text: "the document".to_string(),
            system_prompt: "You draft reports.".to_string(),
            user_prompt: "Draft from: the document".to_string(),
            model_id: "llama3:latest".to_string(),
            temperature: 0.0,
            max_output_tokens: 100,
            thinking_budget: None,
        };
        let usage = adapter.estimate_usage(&request, "A finding.");
        assert!(usage.input_tokens > 0);
        assert!(usage.output_tokens > 0);
    }
}
