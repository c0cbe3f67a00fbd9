// src/storage/memory.rs

// In-memory counter store (for tests, the CLI, and single-instance deployments)
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time;
use tracing::debug;

use crate::clock::{self, Clock};
use crate::config::InMemoryConfig;
use crate::error::{Result, StorageError};
use crate::storage::{CounterHit, CounterSnapshot, CounterStore};

/// Entry in the in-memory storage
#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    count: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }

    fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .and_then(|expiry| (expiry - now).to_std().ok())
    }
}

type Entries = RwLock<HashMap<String, MemoryEntry>>;

/// In-memory counter store.
///
/// Every increment happens under the write lock, which gives the same
/// per-key serialization a shared store provides across processes.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<Entries>,
    clock: Arc<dyn Clock>,
    config: InMemoryConfig,
}

impl MemoryStorage {
    /// Creates a new in-memory storage on the system clock
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    /// Creates a new in-memory storage that reads time from `clock`.
    ///
    /// The background sweep only starts when called inside a tokio runtime;
    /// expired entries are ignored on access either way.
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let data = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        if config.use_background_task {
            if let Ok(handle) = Handle::try_current() {
                let weak = Arc::downgrade(&data);
                let clock = Arc::clone(&clock);
                let interval = config.cleanup_interval;
                handle.spawn(Self::sweep(weak, clock, interval));
            }
        }

        Self {
            data,
            clock,
            config,
        }
    }

    // runs until the last store handle is dropped
    async fn sweep(data: Weak<Entries>, clock: Arc<dyn Clock>, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(entries) = data.upgrade() else {
                debug!("Memory store dropped, stopping expiry sweep");
                break;
            };
            let removed = Self::cleanup_expired_entries(&entries, clock.now());
            if removed > 0 {
                debug!(removed, "Swept expired counters");
            }
        }
    }

    /// Remove expired entries, returning how many were dropped
    fn cleanup_expired_entries(data: &Entries, now: DateTime<Utc>) -> usize {
        let Ok(mut data) = data.write() else {
            return 0;
        };
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        before - data.len()
    }

    /// Number of stored counters, expired ones included until swept
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entry(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let now = self.clock.now();
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).copied().filter(|entry| entry.is_live(now)))
    }
}

#[async_trait]
impl CounterStore for MemoryStorage {
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        let now = self.clock.now();
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;

        if let Some(entry) = data.get_mut(key) {
            if entry.is_live(now) {
                entry.count += 1;
                return Ok(CounterHit {
                    count: entry.count,
                    expires_at: entry.expires_at,
                });
            }
        }

        // fresh window: make room first, then create with the expiry fixed
        if data.len() >= self.config.max_entries && !data.contains_key(key) {
            data.retain(|_, entry| entry.is_live(now));
            if data.len() >= self.config.max_entries {
                return Err(StorageError::CapacityExceeded(self.config.max_entries).into());
            }
        }

        let ttl = ChronoDuration::from_std(ttl_on_create).unwrap_or(ChronoDuration::MAX);
        let entry = MemoryEntry {
            count: 1,
            expires_at: now.checked_add_signed(ttl),
        };
        data.insert(key.to_string(), entry);

        Ok(CounterHit {
            count: entry.count,
            expires_at: entry.expires_at,
        })
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        Ok(self
            .live_entry(key)?
            .and_then(|entry| entry.ttl_remaining(now)))
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        let now = self.clock.now();
        Ok(self.live_entry(key)?.map(|entry| CounterSnapshot {
            count: entry.count,
            ttl_remaining: entry.ttl_remaining(now),
        }))
    }
}
