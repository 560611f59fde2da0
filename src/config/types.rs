//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/reportforge/) and project (.reportforge/)
//! level configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{chunking, models, network, retry};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// LLM backend settings
    pub llm: BackendConfig,

    /// Retry/backoff settings
    pub retry: RetryConfig,

    /// Chunking overrides applied on top of the model table
    pub chunking: ChunkingConfig,

    /// Per-model context budget table; keys are model identifiers.
    /// Entries here override the built-in table.
    pub models: BTreeMap<String, ModelProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: BackendConfig::default(),
            retry: RetryConfig::default(),
            chunking: ChunkingConfig::default(),
            models: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ForgeError::Config` on validation failure.
    pub fn validate(&self) -> crate::types::Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(crate::types::ForgeError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(crate::types::ForgeError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(crate::types::ForgeError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(crate::types::ForgeError::Config(format!(
                "retry backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }

        for (model_id, profile) in &self.models {
            profile.validate(model_id)?;
        }

        if let Some(fraction) = self.chunking.safety_fraction
            && !(fraction > 0.0 && fraction <= 1.0)
        {
            return Err(crate::types::ForgeError::Config(format!(
                "chunking safety_fraction must be in (0.0, 1.0], got {}",
                fraction
            )));
        }

        Ok(())
    }

    /// Resolve the effective budget profile for a model: config table entry,
    /// else built-in family default, with chunking-section overrides applied.
    pub fn profile_for(&self, model_id: &str) -> ModelProfile {
        let mut profile = self
            .models
            .get(model_id)
            .copied()
            .unwrap_or_else(|| ModelProfile::builtin(model_id));

        if let Some(fraction) = self.chunking.safety_fraction {
            profile.safety_fraction = fraction;
        }
        if let Some(overlap) = self.chunking.overlap_tokens {
            profile.overlap_tokens = overlap;
        }

        profile
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Configuration for an LLM backend adapter
///
/// Note: API keys are handled securely - they are never serialized to output
/// and are redacted in debug output. Each adapter converts the key to
/// SecretString internally for runtime protection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type: "anthropic", "openai", "ollama"
    pub backend: String,
    /// Model identifier (backend-specific); None selects the backend default
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Temperature for generation (0.0 = deterministic)
    pub temperature: f32,
    /// API key (for Anthropic, OpenAI). Never serialized to output.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,
    /// Maximum tokens to generate per call
    pub max_output_tokens: u32,
    /// Extended thinking budget in tokens; None disables extended mode
    pub thinking_budget: Option<u32>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: "anthropic".to_string(),
            model: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
            api_key: None,
            api_base: None,
            max_output_tokens: models::DEFAULT_MAX_OUTPUT_TOKENS,
            thinking_budget: None,
        }
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Retry/backoff settings for backend invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per invocation (first try included)
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds)
    pub base_delay_ms: u64,
    /// Backoff multiplier applied per attempt
    pub backoff_factor: f32,
    /// Maximum delay between attempts (seconds)
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            backoff_factor: retry::BACKOFF_FACTOR,
            max_delay_secs: retry::MAX_DELAY_SECS,
        }
    }
}

// =============================================================================
// Chunking Configuration
// =============================================================================

/// Optional chunking overrides applied on top of the per-model table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Override the overlap carried between adjacent chunks (tokens)
    pub overlap_tokens: Option<u32>,
    /// Override the fraction of the context window treated as usable
    pub safety_fraction: Option<f32>,
}

// =============================================================================
// Model Profile Table
// =============================================================================

/// Context budget for one model: the hard window, the safety margin below
/// it, and the default chunk overlap. Static per model; never mutated at
/// runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelProfile {
    /// Hard context window of the model (tokens)
    pub max_context_tokens: u32,
    /// Fraction of the window treated as usable for input
    pub safety_fraction: f32,
    /// Default overlap between adjacent chunks (tokens)
    pub overlap_tokens: u32,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            max_context_tokens: models::FALLBACK_CONTEXT_TOKENS,
            safety_fraction: chunking::DEFAULT_SAFETY_FRACTION,
            overlap_tokens: chunking::DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl ModelProfile {
    /// Tokens a single request may spend on input after the safety margin
    pub fn usable_tokens(&self) -> u32 {
        (f64::from(self.max_context_tokens) * f64::from(self.safety_fraction)).round() as u32
    }

    /// Built-in profile for known model families; unknown models get a
    /// conservative fallback
    pub fn builtin(model_id: &str) -> Self {
        let lower = model_id.to_lowercase();

        let max_context_tokens = if lower.starts_with("claude") {
            200_000
        } else if lower.starts_with("gpt-") || lower.starts_with("o1") || lower.starts_with("o3") {
            128_000
        } else if lower.starts_with("llama") || lower.starts_with("mistral") {
            32_768
        } else {
            models::FALLBACK_CONTEXT_TOKENS
        };

        Self {
            max_context_tokens,
            ..Self::default()
        }
    }

    fn validate(&self, model_id: &str) -> crate::types::Result<()> {
        if !(self.safety_fraction > 0.0 && self.safety_fraction <= 1.0) {
            return Err(crate::types::ForgeError::Config(format!(
                "model '{}': safety_fraction must be in (0.0, 1.0], got {}",
                model_id, self.safety_fraction
            )));
        }

        if self.overlap_tokens >= self.usable_tokens() {
            return Err(crate::types::ForgeError::Config(format!(
                "model '{}': overlap_tokens ({}) must be smaller than the usable budget ({})",
                model_id,
                self.overlap_tokens,
                self.usable_tokens()
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_temperature_validation() {
        let mut config = Config::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_validation() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_profile_builtin_families() {
        assert_eq!(
            ModelProfile::builtin("claude-sonnet-4-20250514").max_context_tokens,
            200_000
        );
        assert_eq!(ModelProfile::builtin("gpt-4o").max_context_tokens, 128_000);
        assert_eq!(
            ModelProfile::builtin("llama3:latest").max_context_tokens,
            32_768
        );
        assert_eq!(
            ModelProfile::builtin("mystery-model").max_context_tokens,
            crate::constants::models::FALLBACK_CONTEXT_TOKENS
        );
    }

    #[test]
    fn test_usable_tokens_applies_safety_fraction() {
        let profile = ModelProfile {
            max_context_tokens: 100_000,
            safety_fraction: 0.65,
            overlap_tokens: 2_000,
        };
        assert_eq!(profile.usable_tokens(), 65_000);
    }

    #[test]
    fn test_profile_for_prefers_config_entry() {
        let mut config = Config::default();
        config.models.insert(
            "custom-model".to_string(),
            ModelProfile {
                max_context_tokens: 42_000,
                safety_fraction: 0.5,
                overlap_tokens: 500,
            },
        );

        let profile = config.profile_for("custom-model");
        assert_eq!(profile.max_context_tokens, 42_000);
        assert_eq!(profile.usable_tokens(), 21_000);

        // Unknown model falls back to the built-in table
        let fallback = config.profile_for("claude-sonnet-4-20250514");
        assert_eq!(fallback.max_context_tokens, 200_000);
    }

    #[test]
    fn test_chunking_overrides_apply() {
        let mut config = Config::default();
        config.chunking.overlap_tokens = Some(123);
        config.chunking.safety_fraction = Some(0.5);

        let profile = config.profile_for("gpt-4o");
        assert_eq!(profile.overlap_tokens, 123);
        assert_eq!(profile.usable_tokens(), 64_000);
    }

    #[test]
    fn test_invalid_model_overlap_rejected() {
        let mut config = Config::default();
        config.models.insert(
            "tiny".to_string(),
            ModelProfile {
                max_context_tokens: 1_000,
                safety_fraction: 0.5,
                overlap_tokens: 500,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = BackendConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
