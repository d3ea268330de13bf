//! kvrelay Probe CLI
//!
//! Seeds a key space, drives it through a resource facade and prints the
//! facade's performance report as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kvrelay_core::{RelayConfig, ResourceFacade};
use kvrelay_pool::{MemoryTransport, RedisTransport, Transport};
use kvrelay_probe::{ProbeOptions, run, seed};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kvrelay-probe")]
#[command(about = "Drive a kvrelay facade and report pool and cache performance")]
struct Args {
    /// Store URL
    #[arg(long, env = "KVRELAY_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Use the in-memory store instead of a server
    #[arg(long)]
    memory: bool,

    /// Total commands to issue
    #[arg(short, long, default_value = "10000")]
    requests: usize,

    /// Size of the key space
    #[arg(short, long, default_value = "1000")]
    keys: usize,

    /// Concurrent workers
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Share of commands that write (0.0 - 1.0)
    #[arg(long, default_value = "0.1", value_parser = parse_ratio)]
    write_ratio: f64,

    /// Seed for a repeatable command mix
    #[arg(long)]
    seed: Option<u64>,

    /// Skip loading the key space before the run
    #[arg(long)]
    no_seed: bool,
}

fn parse_ratio(raw: &str) -> std::result::Result<f64, String> {
    let ratio: f64 = raw.parse().map_err(|err| format!("{raw} is not a number: {err}"))?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{raw} is outside 0.0 - 1.0"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let options = ProbeOptions {
        requests: args.requests,
        keys: args.keys,
        concurrency: args.concurrency,
        write_ratio: args.write_ratio,
        seed: args.seed,
    };

    info!(
        relay = %config.name,
        requests = options.requests,
        keys = options.keys,
        concurrency = options.concurrency,
        write_ratio = options.write_ratio,
        "Starting kvrelay probe"
    );

    if args.memory {
        probe(config, MemoryTransport::new(), &options, !args.no_seed).await
    } else {
        let transport = RedisTransport::new(&args.redis_url)
            .with_context(|| format!("invalid store URL {}", args.redis_url))?;
        probe(config, transport, &options, !args.no_seed).await
    }
}

async fn probe<T: Transport>(
    config: RelayConfig,
    transport: T,
    options: &ProbeOptions,
    load_keys: bool,
) -> Result<()> {
    let endpoint = transport.endpoint();
    let facade = Arc::new(
        ResourceFacade::new(config, transport).context("invalid relay configuration")?,
    );

    let warmed = facade.start().await;
    info!(endpoint = %endpoint, connections = warmed, "Facade started");

    if load_keys {
        seed(&facade, options).await;
    }
    let summary = run(Arc::clone(&facade), options).await;

    let report = facade.get_performance_report();
    for recommendation in &report.recommendations {
        warn!(
            kind = ?recommendation.kind,
            severity = ?recommendation.severity,
            "{recommendation}"
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{}", report.to_json()?);

    facade.shutdown().await;
    Ok(())
}
