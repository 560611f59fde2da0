//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Retry/backoff constants
pub mod retry {
    /// Default maximum attempts per invocation (first try included)
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between attempts (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Cap on backend-supplied retry-after hints (seconds)
    pub const MAX_RETRY_AFTER_SECS: u64 = 300;
}

/// Chunking constants
pub mod chunking {
    /// Default overlap carried between adjacent chunks (tokens)
    pub const DEFAULT_OVERLAP_TOKENS: u32 = 2_000;

    /// Default fraction of a model's context window treated as usable
    pub const DEFAULT_SAFETY_FRACTION: f32 = 0.65;
}

/// Token count cache constants
pub mod cache {
    /// Maximum entries held in the token count cache
    pub const MAX_ENTRIES: usize = 4_096;

    /// Texts shorter than this (bytes) bypass the cache entirely
    pub const MIN_CACHED_LEN: usize = 256;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}

/// Model table fallbacks
pub mod models {
    /// Context window assumed for models missing from the table (tokens)
    pub const FALLBACK_CONTEXT_TOKENS: u32 = 100_000;

    /// Default maximum output tokens per generation
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4_096;
}
