// src/test_utils.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, ManualClock};
use crate::config::{ControlOverride, FailurePolicy, InMemoryConfig, LimiterConfig};
use crate::error::{Result, StorageError};
use crate::middleware::RateLimitMiddleware;
use crate::storage::{CounterHit, CounterSnapshot, CounterStore, MemoryStorage};

/// 2023-11-14T22:13:20Z, a whole second
pub const T0: i64 = 1_700_000_000;

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at_epoch_secs(T0))
}

/// Memory store without a background sweep, reading time from `clock`
pub fn memory_store(clock: Arc<ManualClock>) -> MemoryStorage {
    let config = InMemoryConfig {
        max_entries: 1_000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(60),
    };
    MemoryStorage::with_clock(config, clock)
}

pub fn limiter_config(control: ControlOverride) -> LimiterConfig {
    LimiterConfig {
        key_prefix: "test".to_string(),
        control,
        ..LimiterConfig::default()
    }
}

/// Middleware over a shared memory store, all on one manual clock
pub fn create_test_middleware(
    control: ControlOverride,
) -> (
    RateLimitMiddleware<Arc<MemoryStorage>>,
    Arc<MemoryStorage>,
    Arc<ManualClock>,
) {
    let clock = manual_clock();
    let store = Arc::new(memory_store(Arc::clone(&clock)));
    let middleware = RateLimitMiddleware::new(Arc::clone(&store), limiter_config(control))
        .expect("valid test config")
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    (middleware, store, clock)
}

/// Middleware over a store that can be switched off or slowed down
pub fn create_flaky_middleware(
    control: ControlOverride,
    policy: FailurePolicy,
    store_timeout: Duration,
) -> (RateLimitMiddleware<Arc<FlakyStore>>, Arc<FlakyStore>) {
    let clock = manual_clock();
    let store = Arc::new(FlakyStore::new(memory_store(Arc::clone(&clock))));
    let config = LimiterConfig {
        failure_policy: policy,
        store_timeout,
        ..limiter_config(control)
    };
    let middleware = RateLimitMiddleware::new(Arc::clone(&store), config)
        .expect("valid test config")
        .with_clock(clock);
    (middleware, store)
}

/// Memory store wrapper that simulates outages and slow responses
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStorage,
    down: AtomicBool,
    /// Calls left to fail before the store comes back on its own
    failures_left: AtomicUsize,
    delay: std::sync::Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failures_left: AtomicUsize::new(0),
            delay: std::sync::Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: usize) {
        self.failures_left.store(calls, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Calls that reached this store, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scheduled = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scheduled || self.down.load(Ordering::SeqCst) {
            return Err(StorageError::RedisConnection("simulated outage".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        self.enter().await?;
        self.inner.increment_with_expiry(key, ttl_on_create).await
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.enter().await?;
        self.inner.ttl_remaining(key).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        self.enter().await?;
        self.inner.peek(key).await
    }
}

/// Memory store whose answers arrive late: every increment moves the shared
/// clock forward by the configured lag before returning
#[derive(Debug)]
pub struct LaggingStore {
    inner: MemoryStorage,
    clock: Arc<ManualClock>,
    lag_ms: AtomicU64,
}

impl LaggingStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: memory_store(Arc::clone(&clock)),
            clock,
            lag_ms: AtomicU64::new(0),
        }
    }

    pub fn set_lag(&self, lag: Duration) {
        self.lag_ms.store(lag.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterStore for LaggingStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        let hit = self.inner.increment_with_expiry(key, ttl_on_create).await?;
        self.clock
            .advance(Duration::from_millis(self.lag_ms.load(Ordering::SeqCst)));
        Ok(hit)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl_remaining(key).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        self.inner.peek(key).await
    }
}

/// Clock that moves forward by `step` every time it is read
#[derive(Debug)]
pub struct SteppingClock {
    inner: Arc<ManualClock>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(inner: Arc<ManualClock>, step: Duration) -> Self {
        Self { inner, step }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.inner.now();
        self.inner.advance(self.step);
        now
    }
}
