//! jobqueue CLI - run workloads against a bounded-concurrency queue.

mod scenarios;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jobqueue_queue::QueueConfig;
use scenarios::{Scenario, ScenarioOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobqueue")]
#[command(about = "Run sample workloads through a bounded-concurrency job queue", long_about = None)]
struct Cli {
    /// Workload to run
    #[arg(value_enum)]
    scenario: Scenario,

    /// JSON queue configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Max concurrent jobs (overrides the config file)
    #[arg(long)]
    concurrency: Option<NonZeroUsize>,

    /// Number of jobs to submit
    #[arg(long, default_value = "10")]
    jobs: usize,

    /// Base executor delay in milliseconds
    #[arg(long, default_value = "20")]
    delay_ms: u64,

    /// Timeout in milliseconds for the timeout scenarios
    #[arg(long, default_value = "50")]
    timeout_ms: u64,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let mut config = match &cli.config {
        Some(path) => QueueConfig::load(path)
            .with_context(|| format!("loading queue config from {}", path.display()))?,
        None => QueueConfig::new().with_name(format!("{:?}", cli.scenario).to_lowercase()),
    };
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrent = concurrency;
    }

    let options = ScenarioOptions {
        jobs: cli.jobs,
        delay: Duration::from_millis(cli.delay_ms),
        timeout: Duration::from_millis(cli.timeout_ms),
    };

    let report = scenarios::run(cli.scenario, config, &options).await?;
    info!(queue = %report.queue, "Scenario finished");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Queue: {}", report.queue);
        println!("  submitted: {}", report.stats.submitted);
        println!("  succeeded: {}", report.stats.succeeded);
        println!("  failed:    {}", report.stats.failed);
        println!("  timed out: {}", report.stats.timed_out);
        println!("  zombies:   {}", report.stats.zombies);
        if report.zombie_alarms > 0 {
            println!("  zombie alarms: {}", report.zombie_alarms);
        }
    }

    Ok(())
}
