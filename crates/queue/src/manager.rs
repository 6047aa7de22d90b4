//! Bounded-concurrency job queue.
//!
//! Jobs are admitted in submission order and run as Tokio tasks while
//! holding one of `max_concurrent` slots:
//!
//! ```text
//! submit → pending ──slot free──▶ running ──▶ succeeded | failed | timed-out
//!                                    │
//!                                    └── slot released on every exit path
//! ```
//!
//! A timeout does not cancel the executor. It keeps running detached as a
//! *zombie* until it settles on its own, and its late result is discarded.
//! Executors must therefore be safe to abandon.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use jobqueue_core::{
    JobFailure, JobHandle, JobId, JobOutcome, JobRecord, JobStatus, QueueError, QueueStats, Result,
};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::executor::JobExecutor;
use crate::observer::QueueObserver;
use crate::slots::SlotPool;

type BoxedJob<T> = Pin<Box<dyn Future<Output = std::result::Result<T, JobFailure>> + Send>>;
type JobThunk<T> = Box<dyn FnOnce() -> BoxedJob<T> + Send>;

struct PendingJob<T> {
    id: JobId,
    timeout: Option<Duration>,
    thunk: JobThunk<T>,
}

struct JobEntry<T> {
    record: JobRecord,
    result_tx: Option<oneshot::Sender<JobOutcome<T>>>,
    result_rx: Option<oneshot::Receiver<JobOutcome<T>>>,
    release_on_finish: bool,
}

struct QueueState<T> {
    pending: VecDeque<PendingJob<T>>,
    slots: SlotPool,
    jobs: HashMap<JobId, JobEntry<T>>,
    submitted: u64,
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    zombies: usize,
    ticker_started: bool,
}

impl<T> QueueState<T> {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted,
            pending: self.pending.len(),
            running: self.slots.in_use(),
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            zombies: self.zombies,
        }
    }
}

struct Inner<T> {
    config: QueueConfig,
    state: Mutex<QueueState<T>>,
    observer: Option<Arc<dyn QueueObserver>>,
    idle: Notify,
}

/// Bounded-concurrency job queue.
///
/// Cheap to clone; clones share the same queue. Construct one per context
/// that needs its own concurrency cap and pass it to whoever submits work.
pub struct QueueManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for QueueManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> QueueManager<T> {
    /// Create a queue from its configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a queue that reports lifecycle events to `observer`.
    pub fn with_observer(config: QueueConfig, observer: Arc<dyn QueueObserver>) -> Self {
        Self::build(config, Some(observer))
    }

    fn build(config: QueueConfig, observer: Option<Arc<dyn QueueObserver>>) -> Self {
        let state = QueueState {
            pending: VecDeque::new(),
            slots: SlotPool::new(config.max_concurrent),
            jobs: HashMap::new(),
            submitted: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            zombies: 0,
            ticker_started: false,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                observer,
                idle: Notify::new(),
            }),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Active configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Submit a job.
    ///
    /// `timeout` overrides the queue's default timeout. Returns immediately;
    /// if a slot is free the job is started before this returns. Must be
    /// called from within a Tokio runtime.
    ///
    /// The executor runs in its own task, so a zero timeout always reports
    /// `TimedOut`, even for an executor that is ready on first poll.
    pub fn submit<F, Fut>(&self, executor: F, timeout: Option<Duration>) -> Result<JobHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, JobFailure>> + Send + 'static,
    {
        self.inner
            .enqueue(Box::new(move || Box::pin(executor()) as BoxedJob<T>), timeout)
    }

    /// Submit a job whose executor takes arguments.
    pub fn submit_with<A, F, Fut>(
        &self,
        executor: F,
        args: A,
        timeout: Option<Duration>,
    ) -> Result<JobHandle>
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, JobFailure>> + Send + 'static,
    {
        self.submit(move || executor(args), timeout)
    }

    /// Submit a job to a shared executor.
    pub fn submit_to<A, E>(
        &self,
        executor: Arc<E>,
        args: A,
        timeout: Option<Duration>,
    ) -> Result<JobHandle>
    where
        A: Send + 'static,
        E: JobExecutor<A, Output = T> + ?Sized + 'static,
    {
        self.submit(move || async move { executor.execute(args).await }, timeout)
    }

    /// Wait for a job's outcome.
    ///
    /// Suspends only the calling task. Once the outcome is returned the job
    /// is released and its handle becomes unknown to the queue. If the
    /// returned future is dropped early, the job is released once it has
    /// finished and its outcome is discarded.
    pub async fn await_result(&self, handle: &JobHandle) -> Result<JobOutcome<T>> {
        let id = handle.id();
        let mut claim = {
            let mut state = self.inner.lock();
            let entry = state.jobs.get_mut(&id).ok_or(QueueError::UnknownHandle(id))?;
            let rx = entry.result_rx.take().ok_or(QueueError::ResultClaimed(id))?;
            ResultClaim {
                inner: &*self.inner,
                id,
                rx,
            }
        };

        let received = (&mut claim.rx).await;
        received.map_err(|_| QueueError::Abandoned(id))
    }

    /// Take a job's outcome if it has finished, without waiting.
    ///
    /// Returns `Ok(None)` while the job is pending or running.
    pub fn try_result(&self, handle: &JobHandle) -> Result<Option<JobOutcome<T>>> {
        let id = handle.id();
        let mut state = self.inner.lock();
        let entry = state.jobs.get_mut(&id).ok_or(QueueError::UnknownHandle(id))?;
        if !entry.record.status.is_terminal() {
            return Ok(None);
        }
        let mut rx = entry.result_rx.take().ok_or(QueueError::ResultClaimed(id))?;
        let outcome = rx.try_recv().map_err(|_| QueueError::Abandoned(id));
        state.jobs.remove(&id);
        outcome.map(Some)
    }

    /// Current status of a job.
    pub fn status(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.record(handle).map(|record| record.status)
    }

    /// Snapshot of a job's record.
    pub fn record(&self, handle: &JobHandle) -> Result<JobRecord> {
        let id = handle.id();
        self.inner
            .lock()
            .jobs
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(QueueError::UnknownHandle(id))
    }

    /// Records of all tracked jobs, oldest first, optionally filtered by status.
    pub fn records(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let mut records: Vec<_> = self
            .inner
            .lock()
            .jobs
            .values()
            .filter(|entry| status.map_or(true, |s| entry.record.status == s))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        records
    }

    /// Stop tracking a job whose outcome is not wanted.
    ///
    /// A finished job is released now; an unfinished one when it finishes.
    /// The job itself still runs.
    pub fn forget(&self, handle: &JobHandle) -> Result<()> {
        let id = handle.id();
        let mut state = self.inner.lock();
        let entry = state.jobs.get_mut(&id).ok_or(QueueError::UnknownHandle(id))?;
        if entry.record.status.is_terminal() {
            state.jobs.remove(&id);
        } else {
            entry.release_on_finish = true;
        }
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().snapshot()
    }

    /// Wait until no job is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.stats().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, thunk: JobThunk<T>, timeout: Option<Duration>) -> Result<JobHandle> {
        let timeout = timeout.or(self.config.default_timeout);
        let id = JobId::new();

        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(limit) = self.config.max_pending {
            if state.pending.len() >= limit {
                debug!(queue = %self.config.name, limit, "Rejected job: queue full");
                return Err(QueueError::QueueFull { limit });
            }
        }

        let (tx, rx) = oneshot::channel();
        state.jobs.insert(
            id,
            JobEntry {
                record: JobRecord::new(id, timeout),
                result_tx: Some(tx),
                result_rx: Some(rx),
                release_on_finish: false,
            },
        );
        state.pending.push_back(PendingJob { id, timeout, thunk });
        state.submitted += 1;
        debug!(queue = %self.config.name, job = %id, ?timeout, "Submitted job");

        let launch = self.dispatch(state);
        if !state.ticker_started {
            state.ticker_started = self.start_ticker();
        }
        drop(guard);

        if let Some(launch) = launch {
            launch.spawn();
        }
        Ok(JobHandle::new(id))
    }

    /// Move pending jobs to running while slots are free. Caller holds the
    /// lock and spawns the returned jobs after releasing it.
    fn dispatch(self: &Arc<Self>, state: &mut QueueState<T>) -> Option<Launch<T>> {
        if state.pending.is_empty() || !state.slots.can_acquire() {
            return None;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(
                    queue = %self.config.name,
                    pending = state.pending.len(),
                    "Cannot start jobs outside a runtime: {}",
                    e
                );
                return None;
            }
        };

        let mut jobs = Vec::new();
        while state.slots.can_acquire() {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.slots.acquire();
            // The guard travels with the job, so the slot comes back even if
            // the task is dropped before its first poll.
            let slot = SlotGuard::new(Arc::clone(self), job.id);

            if let Some(entry) = state.jobs.get_mut(&job.id) {
                debug_assert!(entry.record.status.can_transition_to(JobStatus::Running));
                entry.record.status = JobStatus::Running;
                entry.record.started_at = Some(chrono::Utc::now());
            }
            debug!(
                queue = %self.config.name,
                job = %job.id,
                running = state.slots.in_use(),
                free = state.slots.available(),
                pending = state.pending.len(),
                "Started job"
            );
            jobs.push((slot, job));
        }
        Some(Launch { runtime, jobs })
    }

    async fn run_job(slot: SlotGuard<T>, job: PendingJob<T>) {
        let PendingJob { id, timeout, thunk } = job;
        let inner = Arc::clone(&slot.inner);

        // The executor gets its own task so a panic is caught and a timed-out
        // executor can keep running after the slot is released.
        let mut execution = tokio::spawn(async move { thunk().await });

        let Some(after) = timeout else {
            slot.finish(outcome_from_join(execution.await));
            return;
        };

        match tokio::time::timeout(after, &mut execution).await {
            Ok(joined) => slot.finish(outcome_from_join(joined)),
            Err(_) => {
                slot.finish(JobOutcome::TimedOut { after });
                let late = execution.await;
                inner.zombie_settled(id, late.is_ok());
            }
        }
    }

    /// Record a terminal state, release the slot and start the next job.
    ///
    /// Only a running job can finish; any other call is ignored and leaves
    /// the slots and counters untouched.
    fn complete(self: &Arc<Self>, id: JobId, outcome: JobOutcome<T>) {
        let status = outcome.status();
        let failure = match &outcome {
            JobOutcome::Failed(failure) => Some(failure.clone()),
            _ => None,
        };

        let (record, stats, launch) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(entry) = state.jobs.get_mut(&id) else {
                warn!(queue = %self.config.name, job = %id, %status, "Ignored outcome for released job");
                return;
            };
            if !entry.record.status.can_transition_to(status) {
                warn!(
                    queue = %self.config.name,
                    job = %id,
                    from = %entry.record.status,
                    to = %status,
                    "Ignored illegal status change"
                );
                return;
            }

            entry.record.status = status;
            entry.record.finished_at = Some(chrono::Utc::now());
            let record = entry.record.clone();
            let delivered = entry
                .result_tx
                .take()
                .is_some_and(|tx| tx.send(outcome).is_ok());
            if entry.release_on_finish || !delivered {
                state.jobs.remove(&id);
            }

            state.slots.release();
            match status {
                JobStatus::Succeeded => state.succeeded += 1,
                JobStatus::Failed => state.failed += 1,
                _ => {
                    state.timed_out += 1;
                    state.zombies += 1;
                }
            }

            let launch = self.dispatch(state);
            (record, state.snapshot(), launch)
        };
        if let Some(launch) = launch {
            launch.spawn();
        }

        let observer = self.observer.as_deref();
        let run_time_ms = record.run_time().map(|run_time| run_time.num_milliseconds());
        match (&failure, status) {
            (Some(failure), _) => {
                warn!(queue = %self.config.name, job = %id, ?run_time_ms, "Job failed: {}", failure);
                if let Some(observer) = observer {
                    observer.on_failed(&record, failure);
                }
            }
            (None, JobStatus::TimedOut) => {
                warn!(queue = %self.config.name, job = %id, timeout = ?record.timeout, "Job timed out");
                if let Some(observer) = observer {
                    observer.on_timed_out(&record);
                }
            }
            _ => {
                debug!(queue = %self.config.name, job = %id, ?run_time_ms, "Job succeeded");
                if let Some(observer) = observer {
                    observer.on_succeeded(&record);
                }
            }
        }
        if let Some(observer) = observer {
            observer.on_completed(&record);
        }

        if status == JobStatus::TimedOut
            && self.config.max_zombies.is_some_and(|max| stats.zombies > max)
        {
            warn!(
                queue = %self.config.name,
                zombies = stats.zombies,
                max = ?self.config.max_zombies,
                "Too many timed-out executors still running"
            );
            if let Some(observer) = observer {
                observer.on_max_zombies_reached(&stats);
            }
        }

        if stats.is_idle() {
            debug!(queue = %self.config.name, %stats, "Queue idle");
            self.idle.notify_waiters();
            if let Some(observer) = observer {
                observer.on_idle(&stats);
            }
        }
    }

    fn zombie_settled(&self, id: JobId, joined: bool) {
        let mut state = self.lock();
        state.zombies = state.zombies.saturating_sub(1);
        debug!(
            queue = %self.config.name,
            job = %id,
            joined,
            zombies = state.zombies,
            "Timed-out executor settled, result discarded"
        );
    }

    /// Spawn the periodic stats logger. Returns whether it is running.
    fn start_ticker(self: &Arc<Self>) -> bool {
        let Some(period) = self.config.log_interval else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let (stats, capacity) = {
                    let state = inner.lock();
                    (state.snapshot(), state.slots.capacity())
                };
                info!(queue = %inner.config.name, capacity = capacity.get(), %stats, "Queue stats");
            }
        });
        true
    }
}

/// Jobs moved to running under the lock, waiting to be spawned.
struct Launch<T: Send + 'static> {
    runtime: tokio::runtime::Handle,
    jobs: Vec<(SlotGuard<T>, PendingJob<T>)>,
}

impl<T: Send + 'static> Launch<T> {
    fn spawn(self) {
        for (slot, job) in self.jobs {
            self.runtime.spawn(Inner::run_job(slot, job));
        }
    }
}

/// An awaiter's hold on a job's result receiver.
///
/// Dropping it releases the job entry: now if the job has finished (its
/// outcome is lost with the receiver), otherwise when the job finishes.
struct ResultClaim<'a, T: Send + 'static> {
    inner: &'a Inner<T>,
    id: JobId,
    rx: oneshot::Receiver<JobOutcome<T>>,
}

impl<T: Send + 'static> Drop for ResultClaim<'_, T> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        let Some(entry) = state.jobs.get_mut(&self.id) else {
            return;
        };
        if entry.record.status.is_terminal() {
            state.jobs.remove(&self.id);
        } else {
            entry.release_on_finish = true;
        }
    }
}

/// Holds a job's slot; releases it even if the job task is torn down.
struct SlotGuard<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    id: JobId,
    finished: bool,
}

impl<T: Send + 'static> SlotGuard<T> {
    fn new(inner: Arc<Inner<T>>, id: JobId) -> Self {
        Self {
            inner,
            id,
            finished: false,
        }
    }

    fn finish(mut self, outcome: JobOutcome<T>) {
        self.finished = true;
        self.inner.complete(self.id, outcome);
    }
}

impl<T: Send + 'static> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.complete(
                self.id,
                JobOutcome::Failed(JobFailure::panicked("job task dropped before completion")),
            );
        }
    }
}

fn outcome_from_join<T>(
    joined: std::result::Result<std::result::Result<T, JobFailure>, JoinError>,
) -> JobOutcome<T> {
    match joined {
        Ok(result) => result.into(),
        Err(e) if e.is_panic() => JobOutcome::Failed(JobFailure::panicked(panic_message(e.into_panic()))),
        Err(e) => JobOutcome::Failed(JobFailure::panicked(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}
