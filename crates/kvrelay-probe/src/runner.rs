//! Drives a facade with concurrent workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kvrelay_core::ResourceFacade;
use kvrelay_pool::Transport;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::workload::WorkloadGenerator;

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub requests: usize,
    pub keys: usize,
    pub concurrency: usize,
    pub write_ratio: f64,
    pub seed: Option<u64>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            requests: 10_000,
            keys: 1_000,
            concurrency: 16,
            write_ratio: 0.1,
            seed: None,
        }
    }
}

/// Outcome counts for one probe run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProbeSummary {
    pub requests: usize,
    pub succeeded: usize,
    /// Commands the store answered with an error reply
    pub server_errors: usize,
    /// Commands that failed in the pool or transport
    pub failed: usize,
    pub elapsed_ms: u64,
    pub throughput_per_sec: f64,
}

#[derive(Debug, Default)]
struct WorkerTally {
    succeeded: usize,
    server_errors: usize,
    failed: usize,
}

/// Write every key once so reads have something to hit.
pub async fn seed<T: Transport>(facade: &ResourceFacade<T>, options: &ProbeOptions) -> usize {
    let generator = WorkloadGenerator::new(options.keys, options.write_ratio, options.seed);
    let mut loaded = 0;
    for command in generator.seed_commands() {
        match facade.execute(&command).await {
            Ok(_) => loaded += 1,
            Err(err) => warn!(error = %err, key = ?command.key(), "Seed command failed"),
        }
    }
    info!(keys = loaded, "Key space seeded");
    loaded
}

/// Run `options.requests` commands split across `options.concurrency` workers.
#[allow(clippy::cast_precision_loss)]
pub async fn run<T: Transport>(
    facade: Arc<ResourceFacade<T>>,
    options: &ProbeOptions,
) -> ProbeSummary {
    let workers = options.concurrency.max(1);
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    for worker in 0..workers {
        let share = options.requests / workers + usize::from(worker < options.requests % workers);
        let facade = Arc::clone(&facade);
        let seed = options.seed.map(|s| s.wrapping_add(worker as u64));
        let mut generator = WorkloadGenerator::new(options.keys, options.write_ratio, seed);

        tasks.spawn(async move {
            let mut tally = WorkerTally::default();
            for _ in 0..share {
                match facade.execute(&generator.next_command()).await {
                    Ok(reply) if reply.is_error() => tally.server_errors += 1,
                    Ok(_) => tally.succeeded += 1,
                    Err(_) => tally.failed += 1,
                }
            }
            tally
        });
    }

    let mut summary = ProbeSummary {
        requests: options.requests,
        ..Default::default()
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(tally) => {
                summary.succeeded += tally.succeeded;
                summary.server_errors += tally.server_errors;
                summary.failed += tally.failed;
            }
            Err(err) => warn!(error = %err, "Probe worker panicked"),
        }
    }

    let elapsed = started.elapsed().max(Duration::from_micros(1));
    summary.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    summary.throughput_per_sec = options.requests as f64 / elapsed.as_secs_f64();

    info!(
        requests = summary.requests,
        failed = summary.failed,
        elapsed_ms = summary.elapsed_ms,
        throughput = summary.throughput_per_sec,
        "Probe run complete"
    );
    summary
}
