// src/resilience/tests/resilient_storage_tests.rs

use std::sync::Arc;
use std::time::Duration;

use crate::error::{RateLimiterError, StorageError};
use crate::resilience::{
    CircuitBreakerConfig, CircuitState, ResilienceConfig, ResilientStorage, RetryConfig,
};
use crate::storage::CounterStore;
use crate::test_utils::{manual_clock, memory_store, FlakyStore};

const WINDOW: Duration = Duration::from_secs(60);

fn config(failure_threshold: usize, retries: usize) -> ResilienceConfig {
    ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_millis(100),
            success_threshold: 1,
        },
        retry: RetryConfig {
            max_attempts: retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        },
    }
}

fn resilient(failure_threshold: usize, retries: usize) -> ResilientStorage<Arc<FlakyStore>> {
    let flaky = Arc::new(FlakyStore::new(memory_store(manual_clock())));
    ResilientStorage::new(flaky, config(failure_threshold, retries))
}

#[tokio::test]
async fn test_passes_through_when_healthy() {
    let store = resilient(3, 2);

    assert_eq!(store.increment_and_get("k", WINDOW).await.unwrap(), 1);
    assert_eq!(store.increment_and_get("k", WINDOW).await.unwrap(), 2);
    assert_eq!(store.ttl_remaining("k").await.unwrap(), Some(WINDOW));
    assert_eq!(store.peek("k").await.unwrap().map(|s| s.count), Some(2));
    assert_eq!(store.circuit_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let store = resilient(5, 2);
    store.inner().fail_next(1);

    let count = store.increment_and_get("k", WINDOW).await.unwrap();

    assert_eq!(count, 1);
    assert_eq!(store.inner().calls(), 2, "one failed attempt plus one retry");
}

#[tokio::test]
async fn test_gives_up_after_retries() {
    let store = resilient(10, 2);
    store.inner().set_down(true);

    let result = store.increment_and_get("k", WINDOW).await;

    assert!(matches!(
        result,
        Err(RateLimiterError::StoreUnavailable(StorageError::RedisConnection(_)))
    ));
    assert_eq!(store.inner().calls(), 3);
}

#[tokio::test]
async fn test_open_circuit_fails_fast() {
    let store = resilient(2, 0);
    store.inner().set_down(true);

    for _ in 0..2 {
        assert!(store.increment_and_get("k", WINDOW).await.is_err());
    }
    assert_eq!(store.circuit_state().await, CircuitState::Open);

    let calls_before = store.inner().calls();
    let result = store.increment_and_get("k", WINDOW).await;

    assert!(matches!(
        result,
        Err(RateLimiterError::StoreUnavailable(StorageError::CircuitOpen))
    ));
    assert_eq!(store.inner().calls(), calls_before, "store must not be called");
}

#[tokio::test]
async fn test_circuit_recovers_with_store() {
    let store = resilient(1, 0);
    store.inner().set_down(true);
    assert!(store.increment_and_get("k", WINDOW).await.is_err());
    assert_eq!(store.circuit_state().await, CircuitState::Open);

    store.inner().set_down(false);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(store.increment_and_get("k", WINDOW).await.unwrap(), 1);
    assert_eq!(store.circuit_state().await, CircuitState::Closed);
}
