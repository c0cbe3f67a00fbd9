// src/storage/redis.rs

use async_trait::async_trait;
use chrono::DateTime;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::{CounterHit, CounterSnapshot, CounterStore};
use crate::storage_op;

// INCR and PEXPIRE run as one script so no other client can slip in between.
// The expiry is only written for a brand new key, or for a key that somehow
// lost its TTL, which keeps the window anchored to its first hit. The reply
// carries the absolute expiry in epoch millis, read inside the same script,
// so the count and its window can never come from different keys.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
local pttl = redis.call('PTTL', KEYS[1])
if current == 1 or pttl == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    pttl = tonumber(ARGV[1])
end
local now = redis.call('TIME')
local now_ms = tonumber(now[1]) * 1000 + math.floor(tonumber(now[2]) / 1000)
return {current, now_ms + pttl}
"#;

/// Counter store shared across instances through Redis
#[derive(Clone)]
pub struct RedisStorage {
    client: Client,
    connection: ConnectionManager,
    increment: Script,
    config: RedisConfig,
}

// Manually implement Debug; the client and connection carry no useful state
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str()).map_err(|e| {
            RateLimiterError::Config(format!("Invalid Redis URL {}: {}", config.url, e))
        })?;

        let connection_future = ConnectionManager::new(client.clone());

        let connection = match tokio::time::timeout(config.connection_timeout, connection_future)
            .await
        {
            Ok(result) => result.map_err(StorageError::from)?,
            Err(_) => {
                return Err(StorageError::RedisConnection(format!(
                    "Connection to Redis at {} timed out after {:?}",
                    config.url, config.connection_timeout
                ))
                .into());
            }
        };

        Ok(Self {
            client,
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
            config,
        })
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping_future = conn.ping::<String>();

        let result = match tokio::time::timeout(self.config.connection_timeout, ping_future).await
        {
            Ok(inner_result) => inner_result.map_err(StorageError::from)?,
            Err(_) => {
                return Err(StorageError::Timeout {
                    operation: "ping",
                    elapsed: self.config.connection_timeout,
                }
                .into());
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                result
            ))
            .into())
        }
    }

    /// The client this store was opened with
    pub fn client(&self) -> &Client {
        &self.client
    }
}

// PTTL answers -2 for a missing key and -1 for a key without expiry
fn ttl_from_pttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[async_trait]
impl CounterStore for RedisStorage {
    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl_on_create: Duration,
    ) -> Result<CounterHit> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let ttl_ms = ttl_on_create.as_millis().max(1) as u64;

        let result: Result<(u64, i64)> = self
            .increment
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(RateLimiterError::from);

        storage_op!(
            "increment_with_expiry",
            key,
            result,
            started.elapsed().as_millis() as u64
        );
        let (count, expires_at_ms) = result?;
        Ok(CounterHit {
            count,
            expires_at: DateTime::from_timestamp_millis(expires_at_ms),
        })
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let started = Instant::now();
        let mut conn = self.connection.clone();

        let result: Result<i64> = conn.pttl(key).await.map_err(RateLimiterError::from);

        storage_op!(
            "ttl_remaining",
            key,
            result,
            started.elapsed().as_millis() as u64
        );
        Ok(ttl_from_pttl(result?))
    }

    async fn peek(&self, key: &str) -> Result<Option<CounterSnapshot>> {
        let mut conn = self.connection.clone();

        let (count, pttl): (Option<String>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        let Some(count) = count else {
            return Ok(None);
        };
        let count = count
            .parse::<u64>()
            .map_err(|_| StorageError::InvalidValue(key.to_string()))?;

        Ok(Some(CounterSnapshot {
            count,
            ttl_remaining: ttl_from_pttl(pttl),
        }))
    }
}
