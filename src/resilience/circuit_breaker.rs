use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls flow normally
    Closed,
    /// Store calls fail fast without reaching the store
    Open,
    /// Probe calls are let through to see whether the store recovered
    HalfOpen,
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before probing
    pub reset_timeout: Duration,
    /// Consecutive probe successes that close the circuit again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.successes = 0;
    }
}

/// Tracks store failures and short-circuits calls while the store is down.
///
/// All transitions happen under one lock so a state and its counters are
/// always read together.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Whether the next store call may go ahead
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.reset_timeout);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    debug!("Circuit breaker half-open, probing the store");
                }
                cooled_down
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    debug!("Circuit breaker closed, store recovered");
                }
            }
            // a call that started before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.open();
                    warn!(
                        failures = inner.failures,
                        "Circuit breaker opened after consecutive store failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open();
                warn!("Circuit breaker re-opened, probe call failed");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
