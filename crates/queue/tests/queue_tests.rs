//! Scheduling, timeout and isolation behavior of the queue manager.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobqueue_core::failure_codes;
use jobqueue_queue::{
    JobError, JobExecutor, JobFailure, JobHandle, JobId, JobOutcome, JobRecord, JobStatus,
    QueueConfig, QueueError, QueueManager, QueueObserver, QueueStats,
};
use tokio::time::Instant;

fn config(max_concurrent: usize) -> QueueConfig {
    QueueConfig::new()
        .with_name("tests")
        .with_max_concurrent(NonZeroUsize::new(max_concurrent).unwrap())
}

/// Tracks how many executors run at once.
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    async fn run_for(&self, duration: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(duration).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingObserver {
    completions: Mutex<HashMap<JobId, usize>>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicUsize,
    idle: AtomicUsize,
    zombie_alarms: AtomicUsize,
}

impl QueueObserver for RecordingObserver {
    fn on_succeeded(&self, _record: &JobRecord) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failed(&self, _record: &JobRecord, _failure: &JobFailure) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_timed_out(&self, _record: &JobRecord) {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
    }

    fn on_completed(&self, record: &JobRecord) {
        assert!(record.status.is_terminal());
        *self.completions.lock().unwrap().entry(record.id).or_default() += 1;
    }

    fn on_idle(&self, stats: &QueueStats) {
        assert!(stats.is_idle());
        self.idle.fetch_add(1, Ordering::SeqCst);
    }

    fn on_max_zombies_reached(&self, _stats: &QueueStats) {
        self.zombie_alarms.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cap_two_five_jobs() {
    let queue = QueueManager::<usize>::new(config(2));
    let tracker = Arc::new(Concurrency::default());
    let started = Instant::now();

    let handles: Vec<JobHandle> = (0..5)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            queue
                .submit(
                    move || async move {
                        tracker.run_for(Duration::from_millis(10)).await;
                        Ok(i)
                    },
                    None,
                )
                .unwrap()
        })
        .collect();

    let outcomes = futures::future::join_all(handles.iter().map(|h| queue.await_result(h))).await;

    for (i, outcome) in outcomes.into_iter().enumerate() {
        assert_eq!(outcome.unwrap(), JobOutcome::Succeeded(i));
    }
    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(queue.stats().succeeded, 5);
}

#[tokio::test(start_paused = true)]
async fn test_running_never_exceeds_cap() {
    let queue = QueueManager::<()>::new(config(3));
    let tracker = Arc::new(Concurrency::default());

    for i in 0..20u64 {
        let tracker = Arc::clone(&tracker);
        queue
            .submit(
                move || async move {
                    tracker.run_for(Duration::from_millis(1 + i % 7)).await;
                    Ok(())
                },
                None,
            )
            .unwrap();
        assert!(queue.stats().running <= 3);
    }

    queue.wait_idle().await;
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);
    assert_eq!(queue.stats().succeeded, 20);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_in_submission_order() {
    let queue = QueueManager::<()>::new(config(2));
    let order = Arc::new(Mutex::new(Vec::new()));

    // Later jobs finish first; dispatch order must not care.
    let durations = [20u64, 13, 11, 7, 5, 3, 2, 1];
    for (i, millis) in durations.into_iter().enumerate() {
        let order = Arc::clone(&order);
        queue
            .submit(
                move || async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(())
                },
                None,
            )
            .unwrap();
    }

    queue.wait_idle().await;
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_started_at_follows_submission_order() {
    let queue = QueueManager::<()>::new(config(1));
    let handles: Vec<JobHandle> = (0..4)
        .map(|_| {
            queue
                .submit(
                    || async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(())
                    },
                    None,
                )
                .unwrap()
        })
        .collect();

    queue.wait_idle().await;
    let starts: Vec<_> = handles
        .iter()
        .map(|h| queue.record(h).unwrap().started_at.unwrap())
        .collect();
    assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_never_resolving_job_times_out() {
    let queue = QueueManager::<u32>::new(config(1));
    let started = Instant::now();

    let stuck = queue
        .submit(
            || std::future::pending::<Result<u32, JobFailure>>(),
            Some(Duration::from_millis(5)),
        )
        .unwrap();

    let outcome = queue.await_result(&stuck).await.unwrap();
    assert_eq!(outcome, JobOutcome::TimedOut { after: Duration::from_millis(5) });
    assert!(started.elapsed() >= Duration::from_millis(5));
    assert!(matches!(outcome.into_result(), Err(JobError::Timeout { .. })));

    // Slot is free again even though the executor never returned.
    let next = queue.submit(|| async { Ok(7) }, None).unwrap();
    assert_eq!(queue.await_result(&next).await.unwrap(), JobOutcome::Succeeded(7));

    let stats = queue.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.zombies, 1);
    assert_eq!(stats.running, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_slot_at_deadline() {
    let queue = QueueManager::<()>::new(config(1));
    let started = Instant::now();

    queue
        .submit(
            || std::future::pending::<Result<(), JobFailure>>(),
            Some(Duration::from_millis(5)),
        )
        .unwrap();

    let started_at = Arc::new(Mutex::new(None));
    let next = {
        let started_at = Arc::clone(&started_at);
        queue
            .submit(
                move || async move {
                    *started_at.lock().unwrap() = Some(Instant::now());
                    Ok(())
                },
                None,
            )
            .unwrap()
    };
    assert_eq!(queue.status(&next).unwrap(), JobStatus::Pending);

    queue.await_result(&next).await.unwrap();
    let waited = started_at.lock().unwrap().unwrap() - started;
    assert!(waited >= Duration::from_millis(5));
    assert!(waited < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_applies_when_unset() {
    let queue = QueueManager::<()>::new(config(1).with_default_timeout(Duration::from_millis(20)));

    let slow = queue
        .submit(
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            },
            None,
        )
        .unwrap();
    assert_eq!(queue.record(&slow).unwrap().timeout, Some(Duration::from_millis(20)));

    let overridden = queue
        .submit(
            || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            },
            Some(Duration::from_millis(100)),
        )
        .unwrap();

    assert_eq!(
        queue.await_result(&slow).await.unwrap(),
        JobOutcome::TimedOut { after: Duration::from_millis(20) }
    );
    assert_eq!(queue.await_result(&overridden).await.unwrap(), JobOutcome::Succeeded(()));
}

#[tokio::test(start_paused = true)]
async fn test_zombie_settles_later() {
    let queue = QueueManager::<()>::new(config(1));

    let slow = queue
        .submit(
            || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            },
            Some(Duration::from_millis(10)),
        )
        .unwrap();

    assert!(matches!(queue.await_result(&slow).await.unwrap(), JobOutcome::TimedOut { .. }));
    assert_eq!(queue.stats().zombies, 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let stats = queue.stats();
    assert_eq!(stats.zombies, 0);
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_max_zombies_alarm() {
    let observer = Arc::new(RecordingObserver::default());
    let queue = QueueManager::<()>::with_observer(config(2).with_max_zombies(1), observer.clone());

    for _ in 0..2 {
        queue
            .submit(
                || std::future::pending::<Result<(), JobFailure>>(),
                Some(Duration::from_millis(5)),
            )
            .unwrap();
    }

    queue.wait_idle().await;
    assert_eq!(queue.stats().zombies, 2);
    assert_eq!(observer.timed_out.load(Ordering::SeqCst), 2);
    assert_eq!(observer.zombie_alarms.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_does_not_block_queue() {
    let queue = QueueManager::<&'static str>::new(config(1));

    let failing = queue
        .submit(|| async { Err(JobFailure::new("bad input").with_code(400)) }, None)
        .unwrap();
    let following = queue.submit(|| async { Ok("fine") }, None).unwrap();

    match queue.await_result(&failing).await.unwrap() {
        JobOutcome::Failed(failure) => {
            assert_eq!(failure.code, 400);
            assert_eq!(failure.message, "bad input");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(queue.await_result(&following).await.unwrap(), JobOutcome::Succeeded("fine"));
    assert_eq!(queue.stats().failed, 1);
}

#[tokio::test]
async fn test_panicking_executor_is_isolated() {
    let queue = QueueManager::<u8>::new(config(1));

    let panicking = queue
        .submit(
            || async {
                if true {
                    panic!("executor exploded");
                }
                Ok(0)
            },
            None,
        )
        .unwrap();
    let following = queue.submit(|| async { Ok(1) }, None).unwrap();

    match queue.await_result(&panicking).await.unwrap() {
        JobOutcome::Failed(failure) => {
            assert_eq!(failure.code, failure_codes::EXECUTOR_PANIC);
            assert_eq!(failure.message, "executor exploded");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(queue.await_result(&following).await.unwrap(), JobOutcome::Succeeded(1));
}

#[tokio::test(start_paused = true)]
async fn test_awaiter_dropped_mid_run_releases_job_when_finished() {
    let queue = QueueManager::<u8>::new(config(1));
    let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = queue
        .submit(
            || async move {
                let _ = gate_rx.await;
                Ok(4)
            },
            None,
        )
        .unwrap();

    let gave_up = tokio::time::timeout(Duration::from_millis(10), queue.await_result(&handle)).await;
    assert!(gave_up.is_err());
    assert_eq!(queue.status(&handle).unwrap(), JobStatus::Running);
    assert_eq!(queue.records(None).len(), 1);

    gate_tx.send(()).unwrap();
    queue.wait_idle().await;

    assert!(queue.records(None).is_empty());
    assert_eq!(queue.stats().succeeded, 1);
    assert_eq!(queue.await_result(&handle).await, Err(QueueError::UnknownHandle(handle.id())));
}

#[test]
fn test_job_task_torn_down_with_runtime_frees_slot() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let queue = QueueManager::<()>::new(config(1));

    let handle = runtime.block_on(async {
        let handle = queue
            .submit(|| std::future::pending::<Result<(), JobFailure>>(), None)
            .unwrap();
        tokio::task::yield_now().await;
        handle
    });
    assert_eq!(queue.stats().running, 1);

    drop(runtime);

    let stats = queue.stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.failed, 1);
    assert!(stats.is_idle());
    match queue.try_result(&handle).unwrap() {
        Some(JobOutcome::Failed(failure)) => {
            assert_eq!(failure.code, failure_codes::EXECUTOR_PANIC);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_job_completes_exactly_once() {
    let observer = Arc::new(RecordingObserver::default());
    let queue = QueueManager::<u64>::with_observer(config(3), observer.clone());

    let mut handles = Vec::new();
    for i in 0..12u64 {
        let handle = queue
            .submit(
                move || async move {
                    tokio::time::sleep(Duration::from_millis(i)).await;
                    match i % 3 {
                        0 => Ok(i),
                        1 => Err(JobFailure::new(format!("job {} failed", i))),
                        _ => std::future::pending().await,
                    }
                },
                Some(Duration::from_millis(30)),
            )
            .unwrap();
        handles.push(handle);
    }

    queue.wait_idle().await;

    let completions = observer.completions.lock().unwrap().clone();
    assert_eq!(completions.len(), 12);
    assert!(completions.values().all(|&count| count == 1));
    assert_eq!(observer.succeeded.load(Ordering::SeqCst), 4);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 4);
    assert_eq!(observer.timed_out.load(Ordering::SeqCst), 4);
    assert_eq!(observer.idle.load(Ordering::SeqCst), 1);

    let stats = queue.stats();
    assert_eq!(stats.submitted, 12);
    assert_eq!(stats.completed(), 12);

    for handle in &handles {
        let status = queue.status(handle).unwrap();
        let outcome = queue.await_result(handle).await.unwrap();
        assert_eq!(outcome.status(), status);
    }
}

#[tokio::test]
async fn test_unknown_handle_from_other_queue() {
    let first = QueueManager::<()>::new(config(1));
    let second = QueueManager::<()>::new(config(1));

    let handle = first.submit(|| async { Ok(()) }, None).unwrap();
    assert_eq!(
        second.await_result(&handle).await,
        Err(QueueError::UnknownHandle(handle.id()))
    );
    assert_eq!(first.await_result(&handle).await.unwrap(), JobOutcome::Succeeded(()));
}

#[tokio::test]
async fn test_queue_full() {
    let queue = QueueManager::<()>::new(config(1).with_max_pending(1));
    let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();

    let running = queue
        .submit(
            || async move {
                let _ = gate_rx.await;
                Ok(())
            },
            None,
        )
        .unwrap();
    let waiting = queue.submit(|| async { Ok(()) }, None).unwrap();

    assert_eq!(
        queue.submit(|| async { Ok(()) }, None),
        Err(QueueError::QueueFull { limit: 1 })
    );
    assert_eq!(queue.stats().submitted, 2);

    gate_tx.send(()).unwrap();
    queue.await_result(&running).await.unwrap();
    queue.await_result(&waiting).await.unwrap();
    assert!(queue.submit(|| async { Ok(()) }, None).is_ok());
}

struct Multiplier {
    factor: u64,
}

#[async_trait]
impl JobExecutor<u64> for Multiplier {
    type Output = u64;

    async fn execute(&self, args: u64) -> Result<u64, JobFailure> {
        args.checked_mul(self.factor)
            .ok_or_else(|| JobFailure::new("overflow"))
    }
}

#[tokio::test]
async fn test_shared_executor_with_params() {
    let queue = QueueManager::<u64>::new(config(2));
    let executor = Arc::new(Multiplier { factor: 3 });

    let handles: Vec<_> = [1, 2, u64::MAX]
        .into_iter()
        .map(|n| queue.submit_to(Arc::clone(&executor), n, None).unwrap())
        .collect();

    assert_eq!(queue.await_result(&handles[0]).await.unwrap(), JobOutcome::Succeeded(3));
    assert_eq!(queue.await_result(&handles[1]).await.unwrap(), JobOutcome::Succeeded(6));
    assert!(matches!(
        queue.await_result(&handles[2]).await.unwrap(),
        JobOutcome::Failed(failure) if failure.message == "overflow"
    ));
}

#[tokio::test]
async fn test_trait_object_executor() {
    let queue = QueueManager::<u64>::new(config(1));
    let executor: Arc<dyn JobExecutor<u64, Output = u64>> = Arc::new(Multiplier { factor: 10 });

    let handle = queue.submit_to(executor, 4, None).unwrap();
    assert_eq!(queue.await_result(&handle).await.unwrap(), JobOutcome::Succeeded(40));
}

#[tokio::test]
async fn test_submit_with_args() {
    let queue = QueueManager::<String>::new(config(1));

    let handle = queue
        .submit_with(
            |(name, count): (String, usize)| async move { Ok(name.repeat(count)) },
            ("ab".to_string(), 3),
            None,
        )
        .unwrap();

    assert_eq!(
        queue.await_result(&handle).await.unwrap(),
        JobOutcome::Succeeded("ababab".to_string())
    );
}

#[tokio::test]
async fn test_anyhow_errors_convert_to_failures() {
    let queue = QueueManager::<u16>::new(config(1));

    let handle = queue
        .submit(
            || async {
                let port = "not a port".parse::<u16>().map_err(anyhow::Error::from)?;
                Ok::<u16, JobFailure>(port)
            },
            None,
        )
        .unwrap();

    let outcome = queue.await_result(&handle).await.unwrap();
    let envelope = outcome.to_envelope().unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.err.unwrap().code, failure_codes::EXECUTOR_FAILURE);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_logging_keeps_queue_usable() {
    let queue = QueueManager::<()>::new(config(1).with_log_interval(Duration::from_millis(5)));

    let handle = queue
        .submit(
            || async {
                tokio::time::sleep(Duration::from_millis(25)).await;
                Ok(())
            },
            None,
        )
        .unwrap();

    assert_eq!(queue.await_result(&handle).await.unwrap(), JobOutcome::Succeeded(()));
    drop(queue);
    tokio::time::sleep(Duration::from_millis(20)).await;
}
