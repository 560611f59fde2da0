//! Token Counting with Memoization
//!
//! Provides token estimation for context budget management.
//!
//! ## Strategy
//! - Pre-calculate token counts before sending to a backend
//! - Prevent context overflow by budgeting tokens per request
//! - Memoize counts in a process-wide, bounded, LRU-evicting cache
//!
//! Counting is heuristic but deterministic per backend: a given backend id
//! always maps to the same estimator, so chunking decisions are repeatable.
//! Unknown backends fall back to a conservative estimator and the result is
//! flagged as estimated rather than failing.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::constants::cache as cache_constants;

/// Token estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEstimator {
    /// Simple character-based estimation (4 chars = 1 token).
    /// Good for general English text.
    CharBased,
    /// Word-based estimation (0.75 tokens per word on average)
    WordBased,
    /// Prose-aware estimation: punctuation counts as individual tokens,
    /// words by length. Tracks BPE tokenizers on report text more closely.
    #[default]
    ProseAware,
}

impl TokenEstimator {
    /// Estimator calibrated for a backend's tokenizer family.
    /// Returns None for backends we know nothing about.
    pub fn for_backend(backend_id: &str) -> Option<Self> {
        match backend_id {
            "anthropic" | "openai" => Some(Self::ProseAware),
            "ollama" => Some(Self::CharBased),
            _ => None,
        }
    }
}

/// A token count, flagged when produced by the conservative fallback
/// estimator rather than a backend-calibrated one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCount {
    pub tokens: u32,
    pub estimated: bool,
}

// =============================================================================
// Token Count Cache
// =============================================================================

/// Cache key: backend id plus content digest. Hashing the content keeps the
/// cache bounded in memory regardless of document sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    backend: String,
    digest: [u8; 32],
}

struct CacheEntry {
    tokens: u32,
    /// Logical access time, bumped on every hit
    stamp: AtomicU64,
}

/// Process-wide memoization cache for token counts.
///
/// Concurrent readers are fine; two callers recomputing the same key before
/// caching is harmless since the values are equal (idempotent overwrite).
pub(crate) struct TokenCountCache {
    entries: DashMap<CacheKey, CacheEntry>,
    capacity: usize,
    clock: AtomicU64,
}

impl TokenCountCache {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<u32> {
        let entry = self.entries.get(key)?;
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        entry.stamp.store(now, Ordering::Relaxed);
        Some(entry.tokens)
    }

    fn insert(&self, key: CacheKey, tokens: u32) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            CacheEntry {
                tokens,
                stamp: AtomicU64::new(now),
            },
        );

        // Evict the stalest entries once over capacity. The scan is linear
        // but capacity-bounded, and insertions of large texts are rare
        // compared to hits.
        while self.entries.len() > self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().stamp.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            match stalest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The shared process-wide cache, lazily initialized on first count
static SHARED_CACHE: LazyLock<TokenCountCache> =
    LazyLock::new(|| TokenCountCache::with_capacity(cache_constants::MAX_ENTRIES));

// =============================================================================
// Token Counter
// =============================================================================

/// Token counter bound to one backend's estimator
#[derive(Debug, Clone)]
pub struct TokenCounter {
    backend_id: String,
    estimator: TokenEstimator,
    estimated: bool,
}

impl TokenCounter {
    /// Counter for a backend. Known backends get their calibrated estimator;
    /// unknown ones fall back to the conservative default with results
    /// flagged as estimated.
    pub fn for_backend(backend_id: &str) -> Self {
        match TokenEstimator::for_backend(backend_id) {
            Some(estimator) => Self {
                backend_id: backend_id.to_string(),
                estimator,
                estimated: false,
            },
            None => Self {
                backend_id: backend_id.to_string(),
                estimator: TokenEstimator::CharBased,
                estimated: true,
            },
        }
    }

    /// Counter with an explicit estimator (used by tests and calibration)
    pub fn with_estimator(backend_id: &str, estimator: TokenEstimator) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            estimator,
            estimated: false,
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Count tokens in a text, memoized for larger inputs
    pub fn count(&self, text: &str) -> TokenCount {
        if text.len() < cache_constants::MIN_CACHED_LEN {
            return TokenCount {
                tokens: self.compute(text),
                estimated: self.estimated,
            };
        }

        let key = CacheKey {
            backend: self.backend_id.clone(),
            digest: Sha256::digest(text.as_bytes()).into(),
        };

        if let Some(tokens) = SHARED_CACHE.get(&key) {
            trace!(backend = %self.backend_id, tokens, "token count cache hit");
            return TokenCount {
                tokens,
                estimated: self.estimated,
            };
        }

        let tokens = self.compute(text);
        SHARED_CACHE.insert(key, tokens);
        TokenCount {
            tokens,
            estimated: self.estimated,
        }
    }

    /// Check if content fits within a token budget
    pub fn fits_budget(&self, text: &str, budget: u32) -> bool {
        self.count(text).tokens <= budget
    }

    fn compute(&self, text: &str) -> u32 {
        let tokens = match self.estimator {
            TokenEstimator::CharBased => count_char_based(text),
            TokenEstimator::WordBased => count_word_based(text),
            TokenEstimator::ProseAware => count_prose_aware(text),
        };
        tokens as u32
    }
}

/// Simple character-based counting (4 chars = 1 token)
fn count_char_based(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Word-based counting (average 0.75 tokens per word)
fn count_word_based(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 * 0.75).ceil() as usize + 1
}

/// Prose-aware counting.
/// Punctuation marks are usually individual tokens; words cost roughly one
/// token per four characters.
fn count_prose_aware(text: &str) -> usize {
    let mut tokens = 0;
    let mut current_word = 0usize;

    for ch in text.chars() {
        match ch {
            '(' | ')' | '{' | '}' | '[' | ']' | ';' | ':' | ',' | '.' | '"' | '\'' | '!' | '?'
            | '-' | '/' | '&' | '@' | '#' | '%' => {
                if current_word > 0 {
                    tokens += word_tokens(current_word);
                    current_word = 0;
                }
                tokens += 1;
            }
            ' ' | '\t' | '\n' | '\r' => {
                if current_word > 0 {
                    tokens += word_tokens(current_word);
                    current_word = 0;
                }
            }
            _ => {
                current_word += 1;
            }
        }
    }

    if current_word > 0 {
        tokens += word_tokens(current_word);
    }

    tokens.max(1)
}

/// Estimate tokens for a single word of the given length
fn word_tokens(len: usize) -> usize {
    len.div_ceil(4).max(1)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_based_counting() {
        let counter = TokenCounter::with_estimator("test", TokenEstimator::CharBased);
        assert_eq!(counter.count("hello").tokens, 2); // 5 chars = 2 tokens
        assert_eq!(counter.count("hi").tokens, 1); // 2 chars = 1 token
        assert_eq!(counter.count("hello world").tokens, 3); // 11 chars = 3 tokens
    }

    #[test]
    fn test_prose_aware_counting() {
        let counter = TokenCounter::with_estimator("test", TokenEstimator::ProseAware);

        let simple = counter.count("The scene was secured.").tokens;
        assert!(simple > 0);
        assert!(simple <= 10);

        let longer = counter
            .count("The scene was secured at 14:32, and the evidence log (item 4) was updated.")
            .tokens;
        assert!(longer > simple);
    }

    #[test]
    fn test_counting_is_deterministic() {
        let counter = TokenCounter::for_backend("anthropic");
        let text = "Repeatability matters for chunk planning.";
        assert_eq!(counter.count(text), counter.count(text));
    }

    #[test]
    fn test_unknown_backend_flags_estimated() {
        let counter = TokenCounter::for_backend("mystery-backend");
        let count = counter.count("some text");
        assert!(count.estimated);
        assert!(count.tokens > 0);

        let known = TokenCounter::for_backend("anthropic");
        assert!(!known.count("some text").estimated);
    }

    #[test]
    fn test_cache_round_trip() {
        let counter = TokenCounter::for_backend("anthropic");
        // Above MIN_CACHED_LEN so it actually exercises the cache
        let text = "evidence ".repeat(100);

        let first = counter.count(&text);
        let second = counter.count(&text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_eviction_is_bounded() {
        let cache = TokenCountCache::with_capacity(4);

        for i in 0..10 {
            let key = CacheKey {
                backend: "test".to_string(),
                digest: Sha256::digest(format!("text-{}", i).as_bytes()).into(),
            };
            cache.insert(key, i);
        }

        assert!(cache.len() <= 4);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let cache = TokenCountCache::with_capacity(2);

        let key = |name: &str| CacheKey {
            backend: "test".to_string(),
            digest: Sha256::digest(name.as_bytes()).into(),
        };

        cache.insert(key("a"), 1);
        cache.insert(key("b"), 2);
        // Touch "a" so "b" becomes the stalest
        assert_eq!(cache.get(&key("a")), Some(1));

        cache.insert(key("c"), 3);

        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("c")), Some(3));
    }

    #[test]
    fn test_fits_budget() {
        let counter = TokenCounter::with_estimator("test", TokenEstimator::CharBased);
        assert!(counter.fits_budget("tiny", 10));
        assert!(!counter.fits_budget(&"x".repeat(100), 10));
    }

    #[test]
    fn test_word_based_counting() {
        let counter = TokenCounter::with_estimator("test", TokenEstimator::WordBased);
        let count = counter.count("one two three four").tokens;
        assert_eq!(count, 4); // ceil(4 * 0.75) + 1
    }
}
