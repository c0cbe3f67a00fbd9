// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Malformed rate limit control or store settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter store could not be reached or did not answer in time
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// A store call exceeded its deadline
    #[error("Store operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// Calls are being short-circuited after repeated failures
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// In-memory store reached its configured size
    #[error("Maximum entries limit exceeded ({0})")]
    CapacityExceeded(usize),

    /// A counter held something other than an integer
    #[error("Invalid counter value for key: {0}")]
    InvalidValue(String),

    /// A lock guarding in-memory state was poisoned by a panicking writer
    #[error("In-memory store poisoned")]
    Poisoned,
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StorageError::RedisAuth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                StorageError::RedisConnection(err.to_string())
            }
            _ => StorageError::RedisCommand(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        RateLimiterError::StoreUnavailable(err.into())
    }
}

// control documents are JSON, so a parse failure is a configuration problem
impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::Config(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
