use clap::Parser;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{AlgorithmKind, LimiterConfig, ENV_PREFIX};
use gatekeeper::ratelimit::RateLimiter;

/// Fire a series of admission decisions at one key and report the outcome.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// YAML configuration file; `GATEKEEPER_*` variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Algorithm to run (token-bucket, fixed-window, sliding-window, leaky-bucket)
    #[arg(short, long)]
    algorithm: Option<AlgorithmKind>,

    /// Permits per window
    #[arg(short, long)]
    rate: Option<u64>,

    /// Window length in milliseconds
    #[arg(short, long)]
    window_ms: Option<u64>,

    /// Bucket capacity
    #[arg(short, long)]
    burst: Option<u64>,

    /// Key to send requests for
    #[arg(short, long, default_value = "test-user")]
    key: String,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u32,

    /// Pause between requests in milliseconds
    #[arg(short, long, default_value_t = 100)]
    interval_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Resolve the limiter configuration: file and environment first, flags on
    /// top. With neither a file nor `GATEKEEPER_RATE`, start from 5 per minute
    /// with a burst of 3.
    fn limiter_config(&self) -> anyhow::Result<LimiterConfig> {
        let from_env = std::env::var_os(format!("{}_RATE", ENV_PREFIX)).is_some();
        let mut config = if self.config.is_some() || from_env {
            LimiterConfig::load(self.config.as_deref())?
        } else {
            LimiterConfig::new(AlgorithmKind::TokenBucket, 5, Duration::from_secs(60))
                .with_burst_size(3)
        };

        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(window_ms) = self.window_ms {
            config.window = Duration::from_millis(window_ms);
        }
        if let Some(burst) = self.burst {
            config.burst_size = burst;
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = cli.limiter_config()?;
    let limiter = RateLimiter::new(config.clone())?;

    println!(
        "{}: {} requests per {:?} (burst {})",
        config.algorithm,
        config.rate,
        config.window(),
        config.effective_burst_size()
    );

    let mut allowed = 0u32;
    let mut total_latency = Duration::ZERO;
    for i in 1..=cli.requests {
        let started = Instant::now();
        let admitted = limiter.allow(&cli.key).await;
        total_latency += started.elapsed();

        let decision = limiter.check(&cli.key).await;
        if admitted {
            allowed += 1;
        }
        println!(
            "#{:<4} {:<7} remaining={:<5} retry_after={:?}",
            i,
            if admitted { "ALLOWED" } else { "DENIED" },
            decision.remaining,
            decision.retry_after
        );

        if i < cli.requests && cli.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
        }
    }

    println!();
    println!("allowed: {}, denied: {}", allowed, cli.requests - allowed);
    if cli.requests > 0 {
        println!("mean latency: {:?}", total_latency / cli.requests);
    }
    println!("{}", serde_json::to_string_pretty(&limiter.metrics())?);

    limiter.close().await?;
    info!("Gatekeeper stopped");
    Ok(())
}
