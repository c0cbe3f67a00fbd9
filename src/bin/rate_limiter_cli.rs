// src/bin/rate_limiter_cli.rs

use prettytable::{format, row, Table};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use request_limiter::config::{
    ControlOverride, FailurePolicy, InMemoryConfig, LimiterConfig, RedisConfig,
};
use request_limiter::resilience::{ResilienceConfig, ResilientStorage};
use request_limiter::storage::{CounterStore, MemoryStorage, RedisStorage};
use request_limiter::{init_logging, Decision, RateLimitMiddleware, RequestContext};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rate_limiter_cli",
    about = "Fire a sequence of requests at the rate limit middleware and show each decision"
)]
struct Opt {
    /// Counter store to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Wrap the store with retries and a circuit breaker
    #[structopt(long)]
    resilient: bool,

    /// JSON configuration file; replaces the limit flags below
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Requests per window for unauthenticated callers (0 = unlimited)
    #[structopt(short, long, default_value = "5")]
    unauthenticated_limit: u64,

    /// Requests per window for authenticated callers (0 = unlimited)
    #[structopt(short, long, default_value = "20")]
    authenticated_limit: u64,

    /// Requests per second per client (0 = no DoS ceiling)
    #[structopt(short, long, default_value = "0")]
    dos_limit: u64,

    /// Window length in minutes, at least 1
    #[structopt(short, long, default_value = "1")]
    window_minutes: NonZeroU32,

    /// Count each endpoint separately instead of one counter per client
    #[structopt(long)]
    per_endpoint: bool,

    /// Admit requests when the store is unreachable
    #[structopt(long)]
    fail_open: bool,

    /// Client identity to count against
    #[structopt(short, long, default_value = "127.0.0.1")]
    client: String,

    /// Mark requests as authenticated with this key
    #[structopt(long)]
    auth_key: Option<String>,

    /// Endpoint id the requests hit
    #[structopt(short, long, default_value = "/")]
    endpoint: String,

    /// Number of requests to send
    #[structopt(short = "n", long, default_value = "8")]
    num_requests: usize,

    /// Pause between requests in milliseconds
    #[structopt(short = "t", long, default_value = "0")]
    request_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

impl Opt {
    fn limiter_config(&self) -> request_limiter::Result<LimiterConfig> {
        if let Some(path) = &self.config {
            return LimiterConfig::from_file(path);
        }

        let control = ControlOverride::default()
            .enabled(true)
            .unauthenticated_limit(self.unauthenticated_limit)
            .authenticated_limit(self.authenticated_limit)
            .dos_limit(self.dos_limit)
            .global_limit(!self.per_endpoint)
            .limit_window(self.window_minutes);

        Ok(LimiterConfig {
            key_prefix: "cli".to_string(),
            failure_policy: if self.fail_open {
                FailurePolicy::FailOpen
            } else {
                FailurePolicy::FailClosed
            },
            control,
            ..LimiterConfig::default()
        })
    }

    fn request_context(&self) -> RequestContext {
        let ctx = RequestContext::new(self.client.as_str());
        match &self.auth_key {
            Some(key) => ctx.with_auth_key(key.as_str()),
            None => ctx,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    // an explicit RUST_LOG takes over from the verbosity flags
    if std::env::var_os("RUST_LOG").is_some() && !opt.disable_logs {
        init_logging();
    } else {
        let log_level = match (opt.disable_logs, opt.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, 2) => "debug",
            _ => "trace",
        };
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(format!(
                "rate_limiter_cli={},request_limiter={}",
                log_level, log_level
            )))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = opt.limiter_config()?;
    info!(storage = %opt.storage, "Starting rate limiter CLI");

    match opt.storage.as_str() {
        "memory" => {
            let store = Arc::new(MemoryStorage::new(InMemoryConfig::default()));
            run(&opt, store, config).await
        }
        "redis" => {
            let store = RedisStorage::new(RedisConfig::new(opt.redis_url.as_str())).await?;
            if opt.resilient {
                let store = ResilientStorage::new(store, ResilienceConfig::default());
                run(&opt, store, config).await
            } else {
                run(&opt, store, config).await
            }
        }
        other => {
            error!("Unknown storage backend: {}", other);
            Err(format!("Unknown storage backend: {}", other).into())
        }
    }
}

async fn run<S>(opt: &Opt, store: S, config: LimiterConfig) -> Result<(), Box<dyn std::error::Error>>
where
    S: CounterStore,
{
    let middleware = RateLimitMiddleware::new(store, config)?;
    let ctx = opt.request_context();
    let interval = Duration::from_millis(opt.request_interval_ms);

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row![
        "#",
        "decision",
        "X-RateLimit-Limit",
        "X-RateLimit-Remaining",
        "X-RateLimit-Reset",
        "Retry-After"
    ]);

    let mut allowed = 0;
    for i in 0..opt.num_requests {
        if i > 0 && !interval.is_zero() {
            time::sleep(interval).await;
        }

        let decision = middleware.process(&ctx, &opt.endpoint, None).await;
        if decision.is_allowed() {
            allowed += 1;
        }

        let (limit, remaining, reset) = match decision.quota() {
            Some(quota) => (
                quota.limit.to_string(),
                quota.remaining.to_string(),
                quota.reset_at.timestamp().to_string(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let retry_after = match &decision {
            Decision::Denied(denial) => format!("{}s", denial.retry_after.as_secs()),
            _ => "-".to_string(),
        };

        table.add_row(row![i + 1, decision.label(), limit, remaining, reset, retry_after]);
    }

    println!(
        "\nClient {} on {} ({})",
        ctx.client_key,
        opt.endpoint,
        if ctx.is_authenticated() {
            "authenticated"
        } else {
            "unauthenticated"
        }
    );
    table.printstd();
    println!(
        "\n{} of {} requests allowed",
        allowed, opt.num_requests
    );

    match middleware.peek(&ctx, &opt.endpoint).await {
        Ok(Some(snapshot)) => println!(
            "Window counter: {} hits, expires in {}",
            snapshot.count,
            snapshot
                .ttl_remaining
                .map(|ttl| format!("{}s", ttl.as_secs()))
                .unwrap_or_else(|| "never".to_string())
        ),
        Ok(None) => println!("Window counter: none"),
        Err(e) => println!("Window counter unavailable: {}", e),
    }

    Ok(())
}
