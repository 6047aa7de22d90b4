//! Demonstration scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobqueue_core::{JobFailure, JobHandle, QueueStats, ResponseEnvelope};
use jobqueue_queue::{JobExecutor, QueueConfig, QueueManager, QueueObserver};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Which workload to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Every job resolves after a short delay
    AllResolve,
    /// Every job fails
    AllReject,
    /// Every job outlives its timeout
    AllTimeout,
    /// One shared executor fed per-job parameters
    ExecutorWithParams,
    /// Timed-out executors pile up past the zombie threshold
    MaxZombieCount,
}

/// Knobs shared by all scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    /// Number of jobs to submit
    pub jobs: usize,
    /// Base executor delay
    pub delay: Duration,
    /// Timeout used by the timeout scenarios when the config has none
    pub timeout: Duration,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            jobs: 10,
            delay: Duration::from_millis(20),
            timeout: Duration::from_millis(50),
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Queue name
    pub queue: String,
    /// Final counters
    pub stats: QueueStats,
    /// Zombie threshold alerts raised
    pub zombie_alarms: usize,
    /// One envelope per job, in submission order
    pub results: Vec<ResponseEnvelope>,
}

#[derive(Default)]
struct AlarmCounter {
    alarms: AtomicUsize,
}

impl QueueObserver for AlarmCounter {
    fn on_idle(&self, stats: &QueueStats) {
        info!(%stats, "All jobs completed");
    }

    fn on_max_zombies_reached(&self, stats: &QueueStats) {
        self.alarms.fetch_add(1, Ordering::SeqCst);
        warn!(zombies = stats.zombies, "Zombie threshold exceeded");
    }
}

/// Echoes its parameters back after a delay.
struct EchoExecutor {
    delay: Duration,
}

#[async_trait]
impl JobExecutor<(usize, String)> for EchoExecutor {
    type Output = Value;

    async fn execute(&self, args: (usize, String)) -> Result<Value, JobFailure> {
        let (index, label) = args;
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "index": index, "label": label }))
    }
}

/// Stagger delays so jobs do not all finish together.
fn stagger(base: Duration, index: usize) -> Duration {
    base + base * (index % 4) as u32 / 4
}

/// Run `scenario` on a queue built from `config`.
pub async fn run(
    scenario: Scenario,
    mut config: QueueConfig,
    options: &ScenarioOptions,
) -> anyhow::Result<ScenarioReport> {
    if matches!(scenario, Scenario::AllTimeout | Scenario::MaxZombieCount) && config.default_timeout.is_none() {
        config.default_timeout = Some(options.timeout);
    }
    if scenario == Scenario::MaxZombieCount && config.max_zombies.is_none() {
        config.max_zombies = Some(options.jobs / 2);
    }
    config.validate()?;
    let timeout = config.default_timeout;

    let observer = Arc::new(AlarmCounter::default());
    let echo = Arc::new(EchoExecutor { delay: options.delay });
    let queue = QueueManager::<Value>::with_observer(config, observer.clone());
    info!(queue = queue.name(), ?scenario, jobs = options.jobs, "Running scenario");

    let mut handles: Vec<JobHandle> = Vec::with_capacity(options.jobs);
    for index in 0..options.jobs {
        let delay = stagger(options.delay, index);
        let handle = match scenario {
            Scenario::AllResolve => queue.submit(
                move || async move {
                    tokio::time::sleep(delay).await;
                    Ok(json!({ "job": index }))
                },
                None,
            )?,
            Scenario::AllReject => queue.submit(
                move || async move {
                    tokio::time::sleep(delay).await;
                    Err(JobFailure::new(format!("job {} rejected", index)))
                },
                None,
            )?,
            Scenario::AllTimeout | Scenario::MaxZombieCount => {
                let overrun = timeout.unwrap_or(options.timeout) * 4 + delay;
                queue.submit(
                    move || async move {
                        tokio::time::sleep(overrun).await;
                        Ok(json!({ "job": index, "late": true }))
                    },
                    None,
                )?
            }
            Scenario::ExecutorWithParams => {
                queue.submit_to(Arc::clone(&echo), (index, format!("param-{}", index)), None)?
            }
        };
        handles.push(handle);
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in &handles {
        let outcome = queue.await_result(handle).await?;
        results.push(outcome.to_envelope()?);
    }

    Ok(ScenarioReport {
        queue: queue.name().to_string(),
        stats: queue.stats(),
        zombie_alarms: observer.alarms.load(Ordering::SeqCst),
        results,
    })
}
