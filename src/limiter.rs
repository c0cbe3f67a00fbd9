// src/limiter.rs

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::clock::{self, Clock};
use crate::config::{FailurePolicy, LimiterConfig, RateLimitControl};
use crate::decision::{Decision, Denial, DenyReason, Quota};
use crate::error::{RateLimiterError, Result, StorageError};
use crate::keys::CounterKeys;
use crate::storage::CounterStore;

/// Lifetime of a DoS bucket
pub const DOS_BUCKET: Duration = Duration::from_secs(1);

/// Fixed window limit evaluator
///
/// Every window starts with the first request that creates its counter and
/// lasts `limit_window` minutes from there. Later hits never push the expiry
/// out, so a client is always let back in at the same instant the first
/// `X-RateLimit-Reset` announced.
#[derive(Debug)]
pub struct RateLimiter<S>
where
    S: CounterStore,
{
    /// Shared counter store, owned by the application
    store: S,

    clock: Arc<dyn Clock>,

    /// Deadline for each individual store call
    store_timeout: Duration,

    /// What to decide when the store cannot answer
    failure_policy: FailurePolicy,
}

impl<S> RateLimiter<S>
where
    S: CounterStore,
{
    /// Creates an evaluator over `store` using the timeout and failure
    /// policy from `config`
    pub fn new(store: S, config: &LimiterConfig) -> Self {
        Self {
            store,
            clock: clock::system(),
            store_timeout: config.store_timeout,
            failure_policy: config.failure_policy,
        }
    }

    /// Replace the clock used for DoS buckets and reset timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count one request against `keys` and decide whether it may proceed.
    ///
    /// `now` must be the instant `keys` were derived at, so the DoS bucket
    /// and its reset name the same second. Store failures never escape:
    /// they become the configured policy's decision.
    pub async fn evaluate(
        &self,
        control: &RateLimitControl,
        keys: &CounterKeys,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        if !control.is_active() {
            return Decision::PassThrough;
        }

        match self.check_and_record(control, keys, authenticated, now).await {
            Ok(decision) => decision,
            Err(err) => self.on_store_failure(control, keys, authenticated, now, err),
        }
    }

    async fn check_and_record(
        &self,
        control: &RateLimitControl,
        keys: &CounterKeys,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        if let (Some(dos_limit), Some(dos_key)) = (control.dos_limit, keys.dos.as_deref()) {
            let count = self
                .bounded(
                    "increment_and_get",
                    self.store.increment_and_get(dos_key, DOS_BUCKET),
                )
                .await?;

            if count > dos_limit {
                debug!(key = dos_key, count, dos_limit, "DoS ceiling hit");
                // the bucket is named after its epoch second and dies with it
                let reset_at = DateTime::from_timestamp(now.timestamp() + 1, 0)
                    .unwrap_or(now + ChronoDuration::seconds(1));
                return Ok(Decision::Denied(Denial {
                    quota: Quota {
                        limit: dos_limit,
                        remaining: 0,
                        reset_at,
                    },
                    reason: DenyReason::DosCeiling,
                    retry_after: DOS_BUCKET,
                }));
            }
        }

        let Some(limit) = control.tier_limit(authenticated) else {
            return Ok(Decision::PassThrough);
        };

        let window = control.window();
        let hit = self
            .bounded(
                "increment_with_expiry",
                self.store.increment_with_expiry(&keys.client, window),
            )
            .await?;
        let count = hit.count;

        // the expiry the store holds is the source of truth for reset;
        // only the wait is measured, from when the store answered
        let answered = self.clock.now();
        let reset_at = hit.expires_at.unwrap_or_else(|| {
            ChronoDuration::from_std(window)
                .ok()
                .and_then(|window| answered.checked_add_signed(window))
                .unwrap_or(answered)
        });
        let ttl = (reset_at - answered).to_std().unwrap_or(Duration::ZERO);

        let quota = Quota {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
        };

        if count <= limit {
            Ok(Decision::Allowed(quota))
        } else {
            Ok(Decision::Denied(Denial {
                quota,
                reason: DenyReason::WindowLimit {
                    window_minutes: control.limit_window.get(),
                },
                retry_after: whole_seconds(ttl),
            }))
        }
    }

    /// Run a store call under the store timeout
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation,
                elapsed: self.store_timeout,
            }
            .into()),
        }
    }

    fn on_store_failure(
        &self,
        control: &RateLimitControl,
        keys: &CounterKeys,
        authenticated: bool,
        now: DateTime<Utc>,
        err: RateLimiterError,
    ) -> Decision {
        match self.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(
                    error = %err,
                    keys = %keys,
                    policy = "fail_open",
                    "Counter store unavailable, admitting request"
                );
                Decision::PassThrough
            }
            FailurePolicy::FailClosed => {
                warn!(
                    error = %err,
                    keys = %keys,
                    policy = "fail_closed",
                    "Counter store unavailable, rejecting request"
                );
                let limit = control
                    .tier_limit(authenticated)
                    .or(control.dos_limit)
                    .unwrap_or(0);
                Decision::Denied(Denial {
                    quota: Quota {
                        limit,
                        remaining: 0,
                        reset_at: now + ChronoDuration::seconds(1),
                    },
                    reason: DenyReason::StoreUnavailable,
                    retry_after: Duration::from_secs(1),
                })
            }
        }
    }
}

// Retry-After is whole seconds, rounded up and never zero
fn whole_seconds(ttl: Duration) -> Duration {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}
