//! Bounded Retry with Exponential Backoff
//!
//! Wraps any backend adapter call with retry handling.
//!
//! ## Strategy
//!
//! 1. Check cancellation before every attempt
//! 2. On a retryable failure, wait `base_delay * factor^(attempt-1)` with
//!    random jitter, capped at `max_delay`
//! 3. Rate-limit errors honor a backend-supplied retry-after hint when it
//!    is longer than the computed backoff
//! 4. Authentication and invalid-request failures return immediately
//!
//! Classification happens at the adapter boundary; this layer only reads
//! `ErrorKind::is_retryable` and never re-classifies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::provider::Generation;
use crate::config::RetryConfig;
use crate::constants::retry as retry_constants;
use crate::types::{BackendError, CancelHandle, ErrorKind, InvocationResult};

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff parameters for one invocation sequence
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (first try included)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt
    pub backoff_factor: f32,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_constants::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            backoff_factor: retry_constants::BACKOFF_FACTOR,
            max_delay: Duration::from_secs(retry_constants::MAX_DELAY_SECS),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay scheduled after the given attempt fails:
    /// `base_delay * factor^(attempt-1)`, capped at `max_delay`.
    /// Non-decreasing in the attempt number.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f32(factor);
        delay.min(self.max_delay)
    }
}

/// Random jitter up to a quarter of the base delay, so simultaneous
/// clients don't retry in lockstep
fn random_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::rng().random_range(0..max_jitter_ms);
    Duration::from_millis(jitter_ms)
}

// =============================================================================
// Retrying Invoker
// =============================================================================

/// Drives a single adapter call to a final `InvocationResult`, retrying
/// within the policy's bound
pub struct RetryingInvoker {
    policy: RetryPolicy,
    cancel: CancelHandle,
    on_retry: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy, cancel: CancelHandle) -> Self {
        Self {
            policy,
            cancel,
            on_retry: None,
        }
    }

    /// Register a hook invoked when an attempt fails retryably and another
    /// attempt is scheduled (used for status reporting)
    pub fn with_on_retry(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Invoke `op` with bounded retry. `op` receives the 1-based attempt
    /// number. The returned result reflects the final attempt and carries
    /// the attempt count for the whole sequence.
    pub async fn invoke<F, Fut>(
        &self,
        backend_id: &str,
        model_id: &str,
        mut op: F,
    ) -> InvocationResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<Generation, BackendError>>,
    {
        let mut attempt: u32 = 0;
        let mut last_error: Option<BackendError> = None;

        while attempt < self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                debug!(backend = backend_id, attempt, "cancellation observed before attempt");
                return InvocationResult::cancelled(model_id, backend_id, attempt);
            }

            attempt += 1;
            debug!(
                backend = backend_id,
                model = model_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                "invoking backend"
            );

            match op(attempt).await {
                Ok(generation) => {
                    return InvocationResult::success(
                        generation.text,
                        generation.usage,
                        model_id,
                        backend_id,
                        attempt,
                    );
                }
                Err(error) => {
                    warn!(
                        backend = backend_id,
                        attempt,
                        kind = %error.kind,
                        error = %error.message,
                        "backend attempt failed"
                    );

                    if !error.is_retryable() {
                        return InvocationResult::failure(error, model_id, backend_id, attempt);
                    }

                    if attempt < self.policy.max_attempts {
                        let mut delay = self.policy.delay_after_attempt(attempt);
                        // Rate limits know better than our schedule
                        if error.kind == ErrorKind::RateLimited
                            && let Some(hint) = error.retry_after
                        {
                            delay = delay.max(hint);
                        }
                        let delay = delay + random_jitter(delay);

                        debug!(
                            backend = backend_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after backoff"
                        );

                        if let Some(hook) = &self.on_retry {
                            hook(attempt);
                        }

                        sleep(delay).await;
                    }

                    last_error = Some(error);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            BackendError::with_backend(
                ErrorKind::BackendInternal,
                "retry budget exhausted without a recorded error",
                backend_id,
            )
        });
        InvocationResult::failure(error, model_id, backend_id, attempt)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(8),
        }
    }

    fn ok_generation() -> Generation {
        Generation {
            text: "generated".to_string(),
            usage: TokenUsage::new(10, 5),
            model_id: "mock-model".to_string(),
            backend_id: "mock".to_string(),
            api_ms: None,
        }
    }

    #[test]
    fn test_backoff_delays_are_non_decreasing() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.delay_after_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_secs(1));
        // Capped at max_delay
        assert_eq!(policy.delay_after_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_random_jitter_bounded() {
        let base = Duration::from_millis(1000);
        for _ in 0..10 {
            assert!(random_jitter(base) <= Duration::from_millis(250));
        }
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new());
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(ok_generation()) }
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new());
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(BackendError::new(ErrorKind::RateLimited, "throttled"))
                    } else {
                        Ok(ok_generation())
                    }
                }
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_bound_never_exceeded() {
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new());
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::new(ErrorKind::TransientNetwork, "down")) }
            })
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.error_kind(), Some(ErrorKind::TransientNetwork));
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new());
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::new(ErrorKind::Authentication, "bad key")) }
            })
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::Authentication));
    }

    #[tokio::test]
    async fn test_invalid_request_short_circuits() {
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new());

        let result = invoker
            .invoke("mock", "mock-model", |_| async {
                Err(BackendError::new(ErrorKind::InvalidRequest, "bad body"))
            })
            .await;

        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_cancellation_before_first_attempt() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        let invoker = RetryingInvoker::new(fast_policy(3), cancel);
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(ok_generation()) }
            })
            .await;

        assert!(!result.is_success());
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_between_attempts() {
        let cancel = CancelHandle::new();
        let invoker = RetryingInvoker::new(fast_policy(3), cancel.clone());
        let calls = AtomicU32::new(0);

        let result = invoker
            .invoke("mock", "mock-model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                // Cancel while the first attempt is "in flight"
                cancel.cancel();
                async { Err(BackendError::new(ErrorKind::TransientNetwork, "blip")) }
            })
            .await;

        assert!(!result.is_success());
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        // One attempt ran; the retry was pre-empted by cancellation
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_on_retry_hook_fires_per_scheduled_retry() {
        let retries = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&retries);
        let invoker = RetryingInvoker::new(fast_policy(3), CancelHandle::new())
            .with_on_retry(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let result = invoker
            .invoke("mock", "mock-model", |_| async {
                Err(BackendError::new(ErrorKind::BackendInternal, "oops"))
            })
            .await;

        assert!(!result.is_success());
        // 3 attempts, retries scheduled after the first two failures
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }
}
