use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,request_limiter=trace
///
/// Set LOG_FORMAT=json for one JSON object per event.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

        // try_init: a host application may already own the global subscriber
        let installed = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // Useful for debugging concurrency issues
                        .with_line_number(true),
                )
                .try_init()
        };

        if installed.is_ok() {
            tracing::info!(json, "Logging initialized");
        }
    });
}

/// Macro for logging rate limit decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($client:expr, $endpoint:expr, $outcome:expr, $limit:expr, $remaining:expr) => {
        tracing::info!(
            client_key = $client,
            endpoint = $endpoint,
            outcome = $outcome,
            limit = $limit,
            remaining = $remaining,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
