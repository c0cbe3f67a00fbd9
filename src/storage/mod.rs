// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Count and remaining lifetime of a counter, read without touching it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u64,
    /// `None` when the store tracks no expiry for the key
    pub ttl_remaining: Option<Duration>,
}

/// Count after one increment, with the expiry the store holds for the key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    pub count: u64,
    /// Instant the counter dies; fixed for the whole life of the key
    pub expires_at: Option<DateTime<Utc>>,
}

/// Atomic counter primitive every store backend must provide.
///
/// Concurrent increments of the same key must be serialized by the backend,
/// so that no two callers ever observe the same post-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Add one to `key` and return the new count together with its expiry,
    /// both read in the same atomic step.
    ///
    /// A key that does not exist is created with a count of 1 and expires
    /// after `ttl_on_create`. An existing key keeps its expiry.
    async fn increment_with_expiry(&self, key: &str, ttl_on_create: Duration)
        -> Result<CounterHit>;

    /// Add one to `key` and return the new count
    async fn increment_and_get(&self, key: &str, ttl_on_create: Duration) -> Result<u64> {
        Ok(self.increment_with_expiry(key, ttl_on_create).await?.count)
    }

    /// Time left before `key` expires, `None` if it is missing or has no expiry
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>>;

    /// Current count and TTL of `key`, `None` if it does not exist
    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        (**self).increment_with_expiry(key, ttl_on_create).await
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        (**self).ttl_remaining(key).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        (**self).peek(key).await
    }
}
