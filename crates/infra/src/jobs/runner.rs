//! Bounded in-process queue, worker pool and recovery scan for report jobs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use riskmap_core::ReportId;

use super::job::ReportJob;
use super::retry::RetryPolicy;
use super::shutdown::Shutdown;

/// Hands a report to background processing without waiting for it.
pub trait Enqueuer: Send + Sync {
    fn enqueue(&self, report_id: ReportId) -> Result<(), EnqueueError>;
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The report stays pending and is picked up by the next recovery scan.
    #[error("queue is full, report {0} left for the recovery scan")]
    Full(ReportId),

    #[error("runner has stopped, report {0} not queued")]
    Closed(ReportId),
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of concurrent executors
    pub workers: usize,
    /// Bound of the in-process queue
    pub queue_capacity: usize,
    /// How often the recovery scan runs
    pub poll_interval: Duration,
    /// Deadline for a single job attempt
    pub job_timeout: Duration,
    /// Attempts and backoff per report
    pub retry: RetryPolicy,
    /// Reports older than this are never recovered
    pub recovery_window: Duration,
    /// Deadline for flagging a report failed after the last attempt
    pub mark_failed_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 6,
            poll_interval: Duration::from_secs(30),
            job_timeout: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            recovery_window: Duration::from_secs(24 * 60 * 60),
            mark_failed_timeout: Duration::from_secs(10),
        }
    }
}

impl RunnerConfig {
    /// Set the worker count; the queue is resized to twice the workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.queue_capacity = self.workers * 2;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_recovery_window(mut self, window: Duration) -> Self {
        self.recovery_window = window;
        self
    }
}

/// Runner statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub enqueued: u64,
    pub completed: u64,
    pub attempts_failed: u64,
    pub failed_permanently: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    attempts_failed: AtomicU64,
    failed_permanently: AtomicU64,
}

struct Inner {
    job: ReportJob,
    config: RunnerConfig,
    tx: mpsc::Sender<ReportId>,
    rx: tokio::sync::Mutex<mpsc::Receiver<ReportId>>,
    /// Reports queued or running in this runner.
    in_flight: Mutex<HashSet<ReportId>>,
    counters: Counters,
}

/// Worker pool fed by a bounded queue, with a periodic recovery scan.
///
/// Jobs arrive two ways:
/// - `enqueue` (fast path, right after payment confirmation);
/// - the recovery scan, which re-queues `draft`/`processing` reports that
///   were missed, e.g. after a restart.
///
/// A report already queued or running here is not queued twice.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Runner {
    pub fn new(job: ReportJob, config: RunnerConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                job,
                config,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                in_flight: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> RunnerStats {
        let c = &self.inner.counters;
        RunnerStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            attempts_failed: c.attempts_failed.load(Ordering::Relaxed),
            failed_permanently: c.failed_permanently.load(Ordering::Relaxed),
        }
    }

    /// Run the workers and the recovery scan until `shutdown` fires, then
    /// wait for every task to finish.
    pub async fn start(&self, shutdown: Shutdown) {
        let config = &self.inner.config;
        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            poll_interval = ?config.poll_interval,
            "runner starting"
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..config.workers.max(1) {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { runner.work(worker_id, shutdown).await });
        }
        {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { runner.scan(shutdown).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "runner task panicked");
            }
        }

        self.inner.rx.lock().await.close();
        info!(stats = ?self.stats(), "runner stopped");
    }

    /// Queue `report_id` unless it is already queued or running here.
    /// Returns whether it was newly queued.
    fn try_enqueue(&self, report_id: ReportId) -> Result<bool, EnqueueError> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(report_id) {
            return Ok(false);
        }

        match self.inner.tx.try_send(report_id) {
            Ok(()) => {
                self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                in_flight.remove(&report_id);
                Err(EnqueueError::Full(report_id))
            }
            Err(TrySendError::Closed(_)) => {
                in_flight.remove(&report_id);
                Err(EnqueueError::Closed(report_id))
            }
        }
    }

    fn release(&self, report_id: ReportId) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&report_id);
    }

    async fn work(&self, worker_id: usize, shutdown: Shutdown) {
        debug!(worker_id, "worker started");
        loop {
            let next = {
                let mut rx = self.inner.rx.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => None,
                    id = rx.recv() => id,
                }
            };
            let Some(report_id) = next else { break };

            self.run_with_retry(worker_id, report_id, &shutdown).await;
            self.release(report_id);
        }
        debug!(worker_id, "worker stopping");
    }

    async fn run_with_retry(&self, worker_id: usize, report_id: ReportId, shutdown: &Shutdown) {
        let config = &self.inner.config;
        let policy = &config.retry;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts.max(1) {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!(worker_id, report_id = %report_id, attempt, "shutdown during attempt, leaving report for recovery");
                    return;
                }
                outcome = tokio::time::timeout(config.job_timeout, self.inner.job.run(report_id)) => outcome,
            };

            let err = match outcome {
                Ok(Ok(())) => {
                    self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                    info!(worker_id, report_id = %report_id, attempt, "job completed");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("job timed out after {}s", config.job_timeout.as_secs_f64()),
            };

            self.inner.counters.attempts_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker_id,
                report_id = %report_id,
                attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                "job attempt failed"
            );
            last_error = err;

            if policy.should_retry(attempt) {
                let delay = policy.delay_for_attempt(attempt);
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => {
                        info!(worker_id, report_id = %report_id, "shutdown during backoff, leaving report for recovery");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.inner.counters.failed_permanently.fetch_add(1, Ordering::Relaxed);
        error!(worker_id, report_id = %report_id, error = %last_error, "job permanently failed");

        // Runs to completion even when shutdown fires meanwhile.
        let store = self.inner.job.store();
        match tokio::time::timeout(
            config.mark_failed_timeout,
            store.mark_report_failed(report_id, &last_error),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(report_id = %report_id, error = %e, "failed to mark report as failed"),
            Err(_) => error!(report_id = %report_id, "timed out marking report as failed"),
        }
    }

    async fn scan(&self, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately: one scan at startup.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
            }
        }
    }

    /// Queue recent `draft`/`processing` reports. Returns how many were
    /// newly queued.
    pub async fn scan_once(&self) -> usize {
        let since = recovery_cutoff(Utc::now(), self.inner.config.recovery_window);
        let pending = match self.inner.job.store().list_pending_reports(since).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "recovery scan failed");
                return 0;
            }
        };

        let mut queued = 0;
        for report_id in pending {
            match self.try_enqueue(report_id) {
                Ok(true) => {
                    queued += 1;
                    debug!(report_id = %report_id, "recovery scan queued report");
                }
                Ok(false) => {}
                Err(e) => {
                    // Whatever is left waits for the next scan.
                    debug!(error = %e, "recovery scan stopped early");
                    break;
                }
            }
        }
        queued
    }
}

impl Enqueuer for Runner {
    fn enqueue(&self, report_id: ReportId) -> Result<(), EnqueueError> {
        if self.try_enqueue(report_id)? {
            info!(report_id = %report_id, "enqueued report");
        } else {
            debug!(report_id = %report_id, "report already queued or running");
        }
        Ok(())
    }
}

fn recovery_cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use riskmap_core::ReportStatus;
    use riskmap_scoring::{Scorer, TierThresholds};

    use crate::jobs::shutdown::shutdown_channel;
    use crate::store::{InMemoryReportStore, ReportStore};
    use crate::testing::{RecordingMailer, StubHedger, paid_report_with_answers};

    fn runner_with(store: &Arc<InMemoryReportStore>, hedger: Arc<StubHedger>, config: RunnerConfig) -> Runner {
        let job = ReportJob::new(
            store.clone(),
            Scorer::new(TierThresholds::default()),
            hedger,
            RecordingMailer::new(),
        );
        Runner::new(job, config)
    }

    fn fast_config() -> RunnerConfig {
        RunnerConfig::default()
            .with_workers(2)
            .with_poll_interval(Duration::from_secs(3600))
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(5)))
    }

    async fn wait_for_status(store: &InMemoryReportStore, id: ReportId, status: ReportStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let report = store.get_report(id).await.unwrap().unwrap();
            if report.status == status {
                return;
            }
            assert!(Instant::now() < deadline, "report stuck in {:?}", report.status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let store = InMemoryReportStore::arc();
        let runner = runner_with(&store, StubHedger::ok(), fast_config().with_queue_capacity(1));
        let (a, b) = (ReportId::new(), ReportId::new());

        runner.enqueue(a).unwrap();
        assert_eq!(runner.enqueue(b), Err(EnqueueError::Full(b)));
        // Already queued: accepted without taking another slot.
        runner.enqueue(a).unwrap();
        assert_eq!(runner.stats().enqueued, 1);
    }

    #[tokio::test]
    async fn enqueued_report_becomes_ready() {
        let store = InMemoryReportStore::arc();
        let report_id = paid_report_with_answers(&store, "pi_1", &[("q1", "No")]).await;
        let runner = runner_with(&store, StubHedger::ok(), fast_config());
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start(shutdown).await }
        });

        runner.enqueue(report_id).unwrap();
        wait_for_status(&store, report_id, ReportStatus::Ready).await;

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(store.list_risk_results(report_id).await.unwrap().len(), 1);
        assert_eq!(runner.stats().failed_permanently, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_report_failed() {
        let store = InMemoryReportStore::arc();
        // No answers: every attempt fails.
        let report_id = paid_report_with_answers(&store, "pi_1", &[]).await;
        let runner = runner_with(&store, StubHedger::ok(), fast_config());
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start(shutdown).await }
        });

        runner.enqueue(report_id).unwrap();
        wait_for_status(&store, report_id, ReportStatus::Error).await;

        let report = store.get_report(report_id).await.unwrap().unwrap();
        assert!(report.error_message.unwrap().contains("no answers"));
        assert_eq!(runner.stats().attempts_failed, 3);

        // Errored reports are never recovered.
        assert_eq!(runner.scan_once().await, 0);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn attempt_timeout_counts_as_failure() {
        let store = InMemoryReportStore::arc();
        let report_id = paid_report_with_answers(&store, "pi_1", &[("q1", "No")]).await;
        let config = fast_config()
            .with_job_timeout(Duration::from_millis(20))
            .with_retry(RetryPolicy::no_retry());
        let runner = runner_with(&store, StubHedger::slow(Duration::from_secs(30)), config);
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start(shutdown).await }
        });

        runner.enqueue(report_id).unwrap();
        wait_for_status(&store, report_id, ReportStatus::Error).await;
        let report = store.get_report(report_id).await.unwrap().unwrap();
        assert!(report.error_message.unwrap().contains("timed out"));

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn startup_scan_recovers_pending_reports() {
        let store = InMemoryReportStore::arc();
        let report_id = paid_report_with_answers(&store, "pi_1", &[("q1", "No")]).await;
        let runner = runner_with(&store, StubHedger::ok(), fast_config());
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start(shutdown).await }
        });

        // Never enqueued explicitly.
        wait_for_status(&store, report_id, ReportStatus::Ready).await;

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let store = InMemoryReportStore::arc();
        let report_id = paid_report_with_answers(&store, "pi_1", &[]).await;
        let config = fast_config().with_retry(RetryPolicy::fixed(3, Duration::from_secs(600)));
        let runner = runner_with(&store, StubHedger::ok(), config);
        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start(shutdown).await }
        });

        runner.enqueue(report_id).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.stats().attempts_failed == 0 {
            assert!(Instant::now() < deadline, "first attempt never failed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let started = Instant::now();
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        // Abandoned, not failed: the next process recovers it.
        let report = store.get_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Draft);
        assert_eq!(runner.stats().failed_permanently, 0);
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_closed() {
        let store = InMemoryReportStore::arc();
        let runner = runner_with(&store, StubHedger::ok(), fast_config());
        let (trigger, shutdown) = shutdown_channel();
        trigger.trigger();
        runner.start(shutdown).await;

        let id = ReportId::new();
        assert_eq!(runner.enqueue(id), Err(EnqueueError::Closed(id)));
    }

    #[test]
    fn recovery_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(
            recovery_cutoff(now, Duration::from_secs(3600)),
            now - TimeDelta::hours(1)
        );
        assert_eq!(recovery_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
