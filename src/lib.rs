// library entry
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod keys;
pub mod limiter;
pub mod logging;
pub mod middleware;
pub mod resilience;
pub mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ControlOverride, FailurePolicy, InMemoryConfig, LimiterConfig, RateLimitControl, RedisConfig,
};
pub use decision::{Decision, Denial, DenyReason, Outcome, Quota};
pub use error::{RateLimiterError, Result, StorageError};
pub use keys::{AuthKey, ClientKey, CounterKeys, RequestContext};
pub use limiter::RateLimiter;
pub use logging::init as init_logging;
pub use middleware::RateLimitMiddleware;
pub use resilience::{ResilienceConfig, ResilientStorage};
pub use storage::{CounterHit, CounterSnapshot, CounterStore, MemoryStorage, RedisStorage};
