use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::debug;

use crate::error::{RateLimiterError, Result, StorageError};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};
use crate::storage::{CounterHit, CounterSnapshot, CounterStore};

/// Combined configuration for resilience features
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
}

/// Counter store wrapper that retries transient failures and stops calling
/// a store that keeps failing.
///
/// ```plaintext
/// RateLimiter ──► ResilientStorage ──► inner store (Redis, memory, ...)
///                   │        │
///                   ▼        ▼
///           CircuitBreaker  ExponentialBackoff
/// ```
///
/// While the circuit is open every call returns
/// [`StorageError::CircuitOpen`] at once, which the evaluator handles like
/// any other unavailable store.
#[derive(Debug)]
pub struct ResilientStorage<S>
where
    S: CounterStore,
{
    inner: S,
    circuit_breaker: CircuitBreaker,
    config: ResilienceConfig,
}

impl<S> ResilientStorage<S>
where
    S: CounterStore,
{
    pub fn new(inner: S, config: ResilienceConfig) -> Self {
        Self {
            inner,
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            config,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, key: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.config.retry.clone());

        loop {
            if !self.circuit_breaker.allow_request().await {
                debug!(operation, key, "Circuit open, skipping store call");
                return Err(StorageError::CircuitOpen.into());
            }

            let err = match call().await {
                Ok(value) => {
                    self.circuit_breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_transient(&err) {
                return Err(err);
            }
            self.circuit_breaker.record_failure().await;

            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            debug!(
                operation,
                key,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying store call"
            );
            time::sleep(delay).await;
        }
    }
}

// A retried increment whose first attempt did reach the store counts twice,
// the same over-count a cancelled request can cause.
fn is_transient(err: &RateLimiterError) -> bool {
    matches!(
        err,
        RateLimiterError::StoreUnavailable(
            StorageError::RedisConnection(_) | StorageError::Timeout { .. }
        )
    )
}

#[async_trait]
impl<S> CounterStore for ResilientStorage<S>
where
    S: CounterStore,
{
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        self.call("increment_with_expiry", key, || {
            self.inner.increment_with_expiry(key, ttl_on_create)
        })
        .await
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.call("ttl_remaining", key, || self.inner.ttl_remaining(key))
            .await
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        self.call("peek", key, || self.inner.peek(key)).await
    }
}
