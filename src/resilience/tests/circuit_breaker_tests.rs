// src/resilience/tests/circuit_breaker_tests.rs

use std::time::Duration;
use tokio::time;

use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

fn quick_breaker() -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_millis(100),
        success_threshold: 2,
    })
}

async fn trip(breaker: &CircuitBreaker) {
    for _ in 0..3 {
        breaker.record_failure().await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_initial_state_is_closed() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert!(breaker.allow_request().await);
}

#[tokio::test]
async fn test_circuit_opens_after_failures() {
    let breaker = quick_breaker();

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);

    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(!breaker.allow_request().await, "open circuit must fail fast");
}

#[tokio::test]
async fn test_open_circuit_probes_after_reset_timeout() {
    let breaker = quick_breaker();
    trip(&breaker).await;

    assert!(!breaker.allow_request().await);
    time::sleep(Duration::from_millis(150)).await;

    assert!(breaker.allow_request().await);
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
}

#[tokio::test]
async fn test_probe_successes_close_circuit() {
    let breaker = quick_breaker();
    trip(&breaker).await;
    time::sleep(Duration::from_millis(150)).await;
    breaker.allow_request().await;

    breaker.record_success().await;
    assert_eq!(
        breaker.state().await,
        CircuitState::HalfOpen,
        "one success is below the threshold"
    );

    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert!(breaker.allow_request().await);
}

#[tokio::test]
async fn test_probe_failure_reopens_circuit() {
    let breaker = quick_breaker();
    trip(&breaker).await;
    time::sleep(Duration::from_millis(150)).await;
    breaker.allow_request().await;

    breaker.record_success().await;
    breaker.record_failure().await;

    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(
        !breaker.allow_request().await,
        "re-opened circuit waits a full reset timeout again"
    );
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let breaker = quick_breaker();

    breaker.record_failure().await;
    breaker.record_failure().await;
    breaker.record_success().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_concurrent_failures_open_once() {
    let breaker = std::sync::Arc::new(quick_breaker());

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let breaker = std::sync::Arc::clone(&breaker);
            tokio::spawn(async move { breaker.record_failure().await })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert_eq!(breaker.state().await, CircuitState::Open);
}
