//! Periodic, deployment-wide exclusive job runner
//!
//! Each registered job fires on a fixed interval. A run goes through:
//!
//! 1. the enabled switch (static config or toggled at runtime),
//! 2. an in-process guard so overlapping timer ticks or manual triggers
//!    never run the job twice in this process,
//! 3. a lease in `job_locks` so only one instance in the deployment runs it,
//! 4. the job's own cheap skip check.
//!
//! While the executor runs, a heartbeat keeps extending the lease. If the
//! process dies the lease simply expires and another instance takes over.
//! A run whose lease was taken over is cancelled and reported as failed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::db::{Database, JobRunRecord};
use crate::services::manager::{Service, ServiceHealth};

/// Why a run did not execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the in-process guard or the shared lease
    AlreadyRunning,
    /// The job reported that there is no work
    NothingToDo,
}

/// Result of one scheduler tick or manual trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunOutcome {
    Disabled,
    Skipped(SkipReason),
    Completed,
    Failed(String),
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Disabled => "disabled",
            RunOutcome::Skipped(_) => "skipped",
            RunOutcome::Completed => "completed",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

/// Work performed by a scheduled job
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Cheap check run after the lease is taken; `true` skips this tick
    async fn should_skip(&self) -> bool {
        false
    }

    async fn execute(&self) -> Result<()>;
}

/// Static description of a job
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Stable id, also used as the lease name
    pub id: String,
    pub title: String,
    pub interval: Duration,
    pub disabled: bool,
}

/// Snapshot of a job for inspection
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub title: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub running: bool,
    pub last_run: Option<JobRunRecord>,
}

/// Lease settings shared by every job of a registry
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Identity written into `job_locks.holder`
    pub holder: String,
    pub ttl: Duration,
}

/// A registered job and its runtime state
pub struct ScheduledJob {
    definition: JobDefinition,
    executor: Arc<dyn JobExecutor>,
    db: Database,
    lease: LeaseConfig,
    enabled: AtomicBool,
    running: AtomicBool,
    last_run: RwLock<Option<JobRunRecord>>,
}

/// Clears the in-process guard when a run ends, including on early return
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledJob {
    fn new(
        definition: JobDefinition,
        executor: Arc<dyn JobExecutor>,
        db: Database,
        lease: LeaseConfig,
    ) -> Self {
        let enabled = AtomicBool::new(!definition.disabled);
        Self {
            definition,
            executor,
            db,
            lease,
            enabled,
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_run(&self) -> Option<JobRunRecord> {
        self.last_run.read().clone()
    }

    /// Run the job now if it is enabled and nobody else is running it.
    /// Errors are logged and reported in the outcome, never returned.
    pub async fn run_once(&self) -> RunOutcome {
        let job_id = self.id();

        if !self.is_enabled() {
            debug!(job = %job_id, "Job disabled, not running");
            return RunOutcome::Disabled;
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(job = %job_id, "Job already running in this process");
            return RunOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let locks = self.db.job_locks();
        match locks
            .try_acquire(job_id, &self.lease.holder, self.lease.ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(job = %job_id, "Job lease held by another instance");
                return RunOutcome::Skipped(SkipReason::AlreadyRunning);
            }
            Err(e) => {
                error!(job = %job_id, error = %e, "Failed to acquire job lease");
                return RunOutcome::Skipped(SkipReason::AlreadyRunning);
            }
        }

        if self.executor.should_skip().await {
            debug!(job = %job_id, "Nothing to do");
            self.release_lease().await;
            return RunOutcome::Skipped(SkipReason::NothingToDo);
        }

        info!(job = %job_id, "Job started");
        let started_at = Utc::now();

        let cancel = CancellationToken::new();
        let mut heartbeat = tokio::spawn(renew_lease(
            self.db.clone(),
            job_id.to_string(),
            self.lease.clone(),
            cancel.clone(),
        ));

        let executor = self.executor.clone();
        let mut run = tokio::spawn(async move { executor.execute().await });

        // the heartbeat only ends on its own once the lease is gone
        let result = tokio::select! {
            result = &mut run => {
                cancel.cancel();
                if let Err(e) = heartbeat.await {
                    warn!(job = %job_id, error = %e, "Lease heartbeat task failed");
                }
                self.release_lease().await;
                Some(result)
            }
            _ = &mut heartbeat => {
                warn!(job = %job_id, "Job lease lost, cancelling run");
                run.abort();
                if let Err(e) = run.await {
                    debug!(job = %job_id, error = %e, "Cancelled job task ended");
                }
                None
            }
        };

        let outcome = match result {
            None => RunOutcome::Failed("job lease lost to another instance".to_string()),
            Some(Ok(Ok(()))) => {
                info!(job = %job_id, elapsed_ms = (Utc::now() - started_at).num_milliseconds(), "Job completed");
                RunOutcome::Completed
            }
            Some(Ok(Err(e))) => {
                error!(job = %job_id, error = %format!("{:#}", e), "Job failed");
                RunOutcome::Failed(format!("{:#}", e))
            }
            Some(Err(e)) => {
                error!(job = %job_id, error = %e, "Job panicked");
                RunOutcome::Failed(format!("job panicked: {}", e))
            }
        };

        let record = JobRunRecord {
            name: job_id.to_string(),
            started_at,
            finished_at: Some(Utc::now()),
            status: outcome.status().to_string(),
            error: match &outcome {
                RunOutcome::Failed(e) => Some(e.clone()),
                _ => None,
            },
        };
        *self.last_run.write() = Some(record.clone());
        if let Err(e) = self.db.job_runs().record(&record).await {
            error!(job = %job_id, error = %e, "Failed to persist job run");
        }

        outcome
    }

    async fn release_lease(&self) {
        if let Err(e) = self
            .db
            .job_locks()
            .release(self.id(), &self.lease.holder)
            .await
        {
            error!(job = %self.id(), error = %e, "Failed to release job lease");
        }
    }

    async fn status(&self) -> JobStatus {
        let last_run = match self.last_run() {
            Some(run) => Some(run),
            None => self.db.job_runs().get(self.id()).await.unwrap_or_else(|e| {
                warn!(job = %self.id(), error = %e, "Failed to load last job run");
                None
            }),
        };

        JobStatus {
            id: self.definition.id.clone(),
            title: self.definition.title.clone(),
            interval_secs: self.definition.interval.as_secs(),
            enabled: self.is_enabled(),
            running: self.is_running(),
            last_run,
        }
    }
}

/// Extend the lease every ttl/3 until cancelled. Returns early when the
/// lease has been taken over by another holder.
async fn renew_lease(db: Database, job_id: String, lease: LeaseConfig, cancel: CancellationToken) {
    let every = (lease.ttl / 3).max(Duration::from_millis(100));
    let locks = db.job_locks();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(every) => {
                match locks.renew(&job_id, &lease.holder, lease.ttl).await {
                    Ok(true) => debug!(job = %job_id, "Job lease renewed"),
                    Ok(false) => {
                        warn!(job = %job_id, "Job lease lost to another instance");
                        break;
                    }
                    Err(e) => error!(job = %job_id, error = %e, "Failed to renew job lease"),
                }
            }
        }
    }
}

/// All jobs by stable id, plus the timer that drives them
pub struct JobRegistry {
    db: Database,
    lease: LeaseConfig,
    jobs: RwLock<Vec<Arc<ScheduledJob>>>,
    scheduler: Mutex<Option<JobScheduler>>,
    tracker: TaskTracker,
}

impl JobRegistry {
    pub fn new(db: Database, lease: LeaseConfig) -> Self {
        Self {
            db,
            lease,
            jobs: RwLock::new(Vec::new()),
            scheduler: Mutex::new(None),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a job. Must be called before [start](Self::start) for the job
    /// to get a timer.
    pub fn register(
        &self,
        definition: JobDefinition,
        executor: Arc<dyn JobExecutor>,
    ) -> Arc<ScheduledJob> {
        let job = Arc::new(ScheduledJob::new(
            definition,
            executor,
            self.db.clone(),
            self.lease.clone(),
        ));
        self.jobs.write().push(job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Arc<ScheduledJob>> {
        self.jobs.read().iter().find(|j| j.id() == id).cloned()
    }

    pub async fn list(&self) -> Vec<JobStatus> {
        let jobs: Vec<Arc<ScheduledJob>> = self.jobs.read().clone();
        let mut statuses = Vec::with_capacity(jobs.len());
        for job in jobs {
            statuses.push(job.status().await);
        }
        statuses
    }

    /// Run a job now in the background. `None` if the id is unknown.
    pub fn trigger(&self, id: &str) -> Option<JoinHandle<RunOutcome>> {
        let job = self.get(id)?;
        info!(job = %id, "Job triggered manually");
        Some(self.tracker.spawn(async move { job.run_once().await }))
    }

    /// Toggle a job at runtime. Returns `false` if the id is unknown.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.get(id) {
            Some(job) => {
                job.set_enabled(enabled);
                info!(job = %id, enabled, "Job enabled state changed");
                true
            }
            None => false,
        }
    }

    /// Create the timers for every registered job and start them
    pub async fn start(&self) -> Result<()> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        let jobs: Vec<Arc<ScheduledJob>> = self.jobs.read().clone();
        for job in jobs {
            let interval = job.definition.interval;
            let id = job.id().to_string();
            let tracker = self.tracker.clone();

            let timer = Job::new_repeated_async(interval, move |_uuid, _l| {
                let job = job.clone();
                let tracker = tracker.clone();
                Box::pin(async move {
                    tracker.track_future(job.run_once()).await;
                })
            })
            .with_context(|| format!("Failed to create timer for job {}", id))?;

            scheduler.add(timer).await?;
            info!(job = %id, interval_secs = interval.as_secs(), "Job scheduled");
        }

        scheduler.start().await?;
        *self.scheduler.lock().await = Some(scheduler);

        info!("Job scheduler started");
        Ok(())
    }

    /// Stop the timers and wait up to `grace` for in-flight runs
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler
                .shutdown()
                .await
                .context("Failed to stop job scheduler")?;
        }

        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            let running: Vec<String> = self
                .jobs
                .read()
                .iter()
                .filter(|j| j.is_running())
                .map(|j| j.id().to_string())
                .collect();
            warn!(jobs = ?running, grace_secs = grace.as_secs(), "Jobs still running after shutdown grace period");
        }

        info!("Job scheduler stopped");
        Ok(())
    }
}

/// Runs a [JobRegistry] as a managed service depending on `database`
pub struct SchedulerService {
    registry: Arc<JobRegistry>,
    grace: Duration,
}

impl SchedulerService {
    pub fn new(registry: Arc<JobRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Service for SchedulerService {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["database".to_string()]
    }

    async fn start(&self) -> Result<()> {
        self.registry.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.registry.shutdown(self.grace).await
    }

    async fn health(&self) -> Result<ServiceHealth> {
        let jobs = self.registry.list().await;
        if !jobs.is_empty() && jobs.iter().all(|j| !j.enabled) {
            return Ok(ServiceHealth::degraded("all jobs are disabled"));
        }
        Ok(ServiceHealth::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    struct CountingExecutor {
        runs: AtomicUsize,
        finished: AtomicUsize,
        skip: bool,
        delay: Duration,
        fail: bool,
    }

    impl CountingExecutor {
        fn new() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                skip: false,
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn should_skip(&self) -> bool {
            self.skip
        }

        async fn execute(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("indexer table missing");
            }
            Ok(())
        }
    }

    fn definition(id: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            title: id.to_string(),
            interval: Duration::from_secs(3600),
            disabled: false,
        }
    }

    fn lease(holder: &str) -> LeaseConfig {
        LeaseConfig {
            holder: holder.to_string(),
            ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_two_immediate_triggers_run_once() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(db, lease("a"));
        let executor = Arc::new(CountingExecutor {
            delay: Duration::from_millis(100),
            ..CountingExecutor::new()
        });
        registry.register(definition("sync-indexer"), executor.clone());

        let first = registry.trigger("sync-indexer").unwrap();
        let second = registry.trigger("sync-indexer").unwrap();
        let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
        outcomes.sort_by_key(|o| o.status());

        assert_eq!(
            outcomes,
            vec![
                RunOutcome::Completed,
                RunOutcome::Skipped(SkipReason::AlreadyRunning)
            ]
        );
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_skips() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(
            db.job_locks()
                .try_acquire("sync-indexer", "other-instance", Duration::from_secs(60))
                .await
                .unwrap()
        );

        let registry = JobRegistry::new(db, lease("a"));
        let executor = Arc::new(CountingExecutor::new());
        let job = registry.register(definition("sync-indexer"), executor.clone());

        assert_eq!(
            job.run_once().await,
            RunOutcome::Skipped(SkipReason::AlreadyRunning)
        );
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_should_skip_releases_lease() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(db.clone(), lease("a"));
        let executor = Arc::new(CountingExecutor {
            skip: true,
            ..CountingExecutor::new()
        });
        let job = registry.register(definition("queue-indexer-sync"), executor.clone());

        assert_eq!(
            job.run_once().await,
            RunOutcome::Skipped(SkipReason::NothingToDo)
        );
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
        assert!(
            db.job_locks()
                .try_acquire("queue-indexer-sync", "b", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_disabled_job_does_not_run() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(db, lease("a"));
        let executor = Arc::new(CountingExecutor::new());
        let job = registry.register(
            JobDefinition {
                disabled: true,
                ..definition("sync-indexer")
            },
            executor.clone(),
        );

        assert_eq!(job.run_once().await, RunOutcome::Disabled);

        assert!(registry.set_enabled("sync-indexer", true));
        assert_eq!(job.run_once().await, RunOutcome::Completed);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        assert!(!registry.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_failed_run_is_recorded() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(db.clone(), lease("a"));
        let executor = Arc::new(CountingExecutor {
            fail: true,
            ..CountingExecutor::new()
        });
        let job = registry.register(definition("sync-indexer"), executor);

        assert_matches!(job.run_once().await, RunOutcome::Failed(e) if e.contains("indexer table missing"));

        let stored = db.job_runs().get("sync-indexer").await.unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert_eq!(Some(stored), job.last_run());

        let statuses = registry.list().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].last_run.as_ref().map(|r| r.status.as_str()), Some("failed"));

        // the lease is free again after a failure
        assert!(
            db.job_locks()
                .try_acquire("sync-indexer", "b", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_run() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(
            db.clone(),
            LeaseConfig {
                holder: "a".to_string(),
                ttl: Duration::from_millis(300),
            },
        );
        let executor = Arc::new(CountingExecutor {
            delay: Duration::from_secs(5),
            ..CountingExecutor::new()
        });
        registry.register(definition("sync-indexer"), executor.clone());

        let handle = registry.trigger("sync-indexer").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sqlx::query("UPDATE job_locks SET holder = 'other-instance', expires_at = ? WHERE name = 'sync-indexer'")
            .bind(crate::db::sqlite_helpers::datetime_to_str(Utc::now() + chrono::Duration::seconds(60)))
            .execute(db.pool())
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_matches!(outcome, RunOutcome::Failed(e) if e.contains("lease lost"));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(executor.finished.load(Ordering::SeqCst), 0);

        // the new holder keeps its lease
        assert!(
            !db.job_locks()
                .try_acquire("sync-indexer", "b", Duration::from_secs(60))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = JobRegistry::new(db, lease("a"));
        let executor = Arc::new(CountingExecutor {
            delay: Duration::from_millis(100),
            ..CountingExecutor::new()
        });
        let job = registry.register(definition("sync-indexer"), executor);

        let handle = registry.trigger("sync-indexer").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(job.is_running());

        registry.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!job.is_running());
        assert_eq!(handle.await.unwrap(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_service_degraded_when_all_jobs_disabled() {
        let db = Database::connect_in_memory().await.unwrap();
        let registry = Arc::new(JobRegistry::new(db, lease("a")));
        registry.register(
            JobDefinition {
                disabled: true,
                ..definition("sync-indexer")
            },
            Arc::new(CountingExecutor::new()),
        );
        let service = SchedulerService::new(registry.clone(), Duration::from_secs(1));

        let health = service.health().await.unwrap();
        assert_eq!(health.status, crate::services::manager::HealthStatus::Degraded);

        registry.set_enabled("sync-indexer", true);
        let health = service.health().await.unwrap();
        assert_eq!(health.status, crate::services::manager::HealthStatus::Healthy);
    }
}
