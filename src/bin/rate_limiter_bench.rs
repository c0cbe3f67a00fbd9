// src/bin/rate_limiter_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use request_limiter::config::{ControlOverride, InMemoryConfig, LimiterConfig, RedisConfig};
use request_limiter::storage::{CounterStore, MemoryStorage, RedisStorage};
use request_limiter::{RateLimitMiddleware, RequestContext};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "rate_limiter_bench",
    about = "Hammer the rate limit middleware from concurrent clients and check it never over-admits"
)]
struct Opt {
    /// Counter store to benchmark
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Requests each client may make per window
    #[structopt(short, long, default_value = "100")]
    limit: u64,

    /// Window length in minutes, at least 1
    #[structopt(short, long, default_value = "1")]
    window_minutes: NonZeroU32,

    /// Number of concurrent clients to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per client
    #[structopt(short = "r", long, default_value = "500")]
    requests_per_user: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum number of requests in flight
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    allowed: u64,
    denied: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "rate_limiter_bench={},request_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match opt.storage.as_str() {
        "memory" => {
            let store = Arc::new(MemoryStorage::new(InMemoryConfig {
                max_entries: 1_000_000,
                ..InMemoryConfig::default()
            }));
            run_benchmark(store, "Memory", &opt).await
        }
        "redis" => {
            let config = RedisConfig::new(opt.redis_url.as_str());
            let store = match RedisStorage::new(config).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(e.into());
                }
            };
            run_benchmark(store, "Redis", &opt).await
        }
        other => Err(format!("Unknown storage backend: {}", other).into()),
    }
}

async fn run_benchmark<S>(
    store: Arc<S>,
    name: &str,
    opt: &Opt,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: CounterStore + 'static,
{
    println!("\nRunning benchmark: {}", name);
    println!("==================={}", "=".repeat(name.len()));

    let control = ControlOverride::default()
        .enabled(true)
        .unauthenticated_limit(opt.limit)
        .limit_window(opt.window_minutes);
    let expected_allowed = opt.limit.min(opt.requests_per_user as u64) * opt.num_users as u64;

    // every run and iteration counts on fresh keys
    let run_id: u32 = rand::random();

    let mut total_duration = Duration::ZERO;
    let mut total = Tally::default();
    let mut over_admitted = false;

    for iteration in 0..opt.iterations {
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);

        let config = LimiterConfig {
            key_prefix: format!("bench:{:08x}:{}", run_id, iteration),
            control: control.clone(),
            ..LimiterConfig::default()
        };
        let middleware = Arc::new(RateLimitMiddleware::new(Arc::clone(&store), config)?);

        let progress = ProgressBar::new((opt.num_users * opt.requests_per_user) as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {per_sec}",
            )?
            .progress_chars("=> "),
        );
        progress.set_prefix(format!("iteration {}", iteration + 1));

        let barrier = Arc::new(Barrier::new(opt.num_users));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
        let start_time = Instant::now();

        let handles: Vec<_> = (0..opt.num_users)
            .map(|user_id| {
                let middleware = Arc::clone(&middleware);
                let barrier = Arc::clone(&barrier);
                let semaphore = Arc::clone(&semaphore);
                let progress = progress.clone();
                let ctx = RequestContext::new(format!("user_{}", user_id));
                let requests = opt.requests_per_user;

                tokio::spawn(async move {
                    barrier.wait().await;

                    let mut tally = Tally::default();
                    for _ in 0..requests {
                        let Ok(_permit) = semaphore.acquire().await else {
                            break;
                        };
                        if middleware.process(&ctx, "/bench", None).await.is_allowed() {
                            tally.allowed += 1;
                        } else {
                            tally.denied += 1;
                        }
                        progress.inc(1);
                    }
                    tally
                })
            })
            .collect();

        let mut iteration_tally = Tally::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(tally) => {
                    iteration_tally.allowed += tally.allowed;
                    iteration_tally.denied += tally.denied;
                }
                Err(e) => warn!("Client task failed: {}", e),
            }
        }

        let elapsed = start_time.elapsed();
        progress.finish_and_clear();

        total_duration += elapsed;
        total.allowed += iteration_tally.allowed;
        total.denied += iteration_tally.denied;

        let requests = iteration_tally.allowed + iteration_tally.denied;
        println!(
            "Iteration {}: {:?}, {} allowed, {} denied, {:.2} req/sec",
            iteration + 1,
            elapsed,
            iteration_tally.allowed,
            iteration_tally.denied,
            requests as f64 / elapsed.as_secs_f64()
        );

        if iteration_tally.allowed > expected_allowed {
            over_admitted = true;
            error!(
                allowed = iteration_tally.allowed,
                expected = expected_allowed,
                "Limiter admitted more requests than the limit allows"
            );
        } else if iteration_tally.allowed < expected_allowed {
            warn!(
                allowed = iteration_tally.allowed,
                expected = expected_allowed,
                "Fewer requests admitted than expected; was the store failing?"
            );
        }
    }

    let requests = total.allowed + total.denied;
    let iterations = opt.iterations.max(1) as u32;

    println!("\nBenchmark Results for {}:", name);
    println!("  Total Requests:     {}", requests);
    println!(
        "  Allowed:            {} (expected {} per iteration)",
        total.allowed, expected_allowed
    );
    println!("  Denied:             {}", total.denied);
    println!("  Avg. Duration:      {:?}", total_duration / iterations);
    println!(
        "  Avg. Throughput:    {:.2} requests/second",
        requests as f64 / total_duration.as_secs_f64().max(f64::EPSILON)
    );

    if over_admitted {
        return Err("rate limit was exceeded under concurrency".into());
    }
    println!("  Over-admission:     none");

    Ok(())
}
