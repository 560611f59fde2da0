//! LLM Integration Layer
//!
//! Token accounting, document chunking, backend adapters and the bounded
//! retry wrapper that drives them.

pub mod chunker;
pub mod provider;
pub mod retry;
pub mod token_counter;

pub use chunker::{Chunk, Chunker};
pub use provider::{
    AnthropicAdapter, Generation, OllamaAdapter, OpenAiAdapter, ProviderAdapter, ProviderLimits,
    SharedAdapter, create_adapter,
};
pub use retry::{RetryPolicy, RetryingInvoker};
pub use token_counter::{TokenCount, TokenCounter, TokenEstimator};
