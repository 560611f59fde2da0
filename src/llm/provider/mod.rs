//! LLM Backend Adapters
//!
//! Defines the ProviderAdapter trait: a uniform capability surface over a
//! specific LLM backend. One implementation per backend, selected through
//! a factory keyed by the backend identifier; adding a backend means adding
//! one module and one factory arm, never touching the orchestrator.
//!
//! ## Contract
//!
//! - `generate`: single request/response call, usage from the backend's
//!   reported accounting when available, else estimated
//! - `generate_extended`: reasoning-augmented variant; backends without the
//!   capability report it as unsupported rather than silently downgrading
//! - `count_tokens` / `limits`: static capability and budget metadata the
//!   orchestrator routes on
//!
//! Adapters hold configuration only (credentials, endpoint, timeout,
//! model) - no cross-call mutable state. Failures are classified here, at
//! the adapter boundary, and never re-classified upstream.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use std::sync::Arc;

use async_trait::async_trait;

use super::token_counter::TokenCount;
use crate::config::{BackendConfig, ModelProfile};
use crate::types::{BackendError, ErrorKind, GenerationRequest, Result, TokenUsage};

// =============================================================================
// Adapter Output Types
// =============================================================================

/// Raw result of one successful backend call
#[derive(Debug, Clone)]
pub struct Generation {
    /// Generated text
    pub text: String,
    /// Token accounting, backend-reported or estimated
    pub usage: TokenUsage,
    /// Model that served the call
    pub model_id: String,
    /// Backend identifier
    pub backend_id: String,
    /// Backend-reported processing time, when available
    pub api_ms: Option<u64>,
}

/// Static capability and budget metadata for a backend/model pair
#[derive(Debug, Clone, Copy)]
pub struct ProviderLimits {
    /// Hard context window (tokens)
    pub max_context_tokens: u32,
    /// Whether `generate_extended` is available
    pub supports_extended_thinking: bool,
    /// Whether the backend accepts documents as native input blocks
    /// (relevant to upstream converters, surfaced here as metadata)
    pub supports_native_document: bool,
}

/// Shared adapter handle; each batch run constructs its own instances so
/// credential/timeout configuration is never shared across runs
pub type SharedAdapter = Arc<dyn ProviderAdapter>;

// =============================================================================
// Provider Adapter Trait
// =============================================================================

/// Uniform capability surface over one LLM backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Single request/response text generation
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, BackendError>;

    /// Reasoning-augmented generation with a hidden thinking budget.
    /// Backends without the capability refuse instead of downgrading.
    async fn generate_extended(
        &self,
        request: &GenerationRequest,
        thinking_budget: u32,
    ) -> std::result::Result<Generation, BackendError> {
        let _ = (request, thinking_budget);
        Err(BackendError::with_backend(
            ErrorKind::InvalidRequest,
            "extended thinking is not supported by this backend",
            self.backend_id(),
        ))
    }

    /// Count tokens the way this backend's budget accounting does
    fn count_tokens(&self, text: &str) -> TokenCount;

    /// Static capability and budget metadata
    fn limits(&self) -> ProviderLimits;

    /// Backend identifier used in logs and results
    fn backend_id(&self) -> &str;

    /// Model currently targeted
    fn model_id(&self) -> &str;
}

// =============================================================================
// Factory
// =============================================================================

/// Create an adapter from configuration, keyed by the backend id string
pub fn create_adapter(config: &BackendConfig, profile: &ModelProfile) -> Result<SharedAdapter> {
    match config.backend.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicAdapter::new(config, profile)?)),
        "openai" => Ok(Arc::new(OpenAiAdapter::new(config, profile)?)),
        "ollama" => Ok(Arc::new(OllamaAdapter::new(config, profile)?)),
        other => Err(crate::types::ForgeError::Config(format!(
            "Unknown backend: {}. Supported: anthropic, openai, ollama",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_backend() {
        let config = BackendConfig {
            backend: "frontier-9000".to_string(),
            ..Default::default()
        };
        let profile = ModelProfile::default();
        assert!(create_adapter(&config, &profile).is_err());
    }

    #[test]
    fn test_factory_builds_ollama_without_credentials() {
        let config = BackendConfig {
            backend: "ollama".to_string(),
            ..Default::default()
        };
        let profile = ModelProfile::default();
        let adapter = create_adapter(&config, &profile).expect("adapter");
        assert_eq!(adapter.backend_id(), "ollama");
        assert!(!adapter.limits().supports_extended_thinking);
    }
}
