// src/resilience/mod.rs
//! Resilience wrappers for counter stores.
//!
//! - **Circuit Breaking** stops calling a store that keeps failing
//! - **Retry with Exponential Backoff** absorbs short connection blips

mod circuit_breaker;
mod exponential_backoff;
mod resilient_storage;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use resilient_storage::{ResilienceConfig, ResilientStorage};
