//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use storefront_core::{Clock, SystemClock, TenantId};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

/// Why a claimed job did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobExecutionError {
    #[error("no handler for job kind: {0}")]
    NoHandler(String),
    #[error("job attempt failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Shared view of the statistics, for readers outliving a borrow of the handle.
    pub fn stats_source(&self) -> Arc<Mutex<ExecutorStats>> {
        self.stats.clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, job: &Job, result: &Result<(), JobExecutionError>) {
        self.jobs_processed += 1;
        match result {
            Ok(()) => self.jobs_succeeded += 1,
            Err(_) => {
                self.jobs_failed += 1;
                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    self.jobs_dead_lettered += 1;
                }
            }
        }
    }
}

/// Background job executor.
///
/// Polls a job store for claimable jobs, executes them with registered
/// handlers, and schedules retries or dead-letters per the job's policy.
/// Time comes from the injected clock so backoff can be driven in tests.
pub struct JobExecutor<S: JobStore> {
    store: S,
    clock: Arc<dyn Clock>,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    /// Create a new executor on the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            handlers: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a handler for a job kind.
    ///
    /// Patterns are an exact type name, a category (`"email.*"`), or `"*"`.
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind_pattern.into(), Box::new(handler));
    }

    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Run one attempt of a job already claimed from the store.
    pub fn execute_one(&self, job: &mut Job) -> Result<(), JobExecutionError> {
        let started = self.clock.now();

        let outcome = match self.get_handler(&job.kind) {
            Some(handler) => handler(job),
            None => {
                let error = JobExecutionError::NoHandler(job.kind.type_name().to_string());
                warn!(job_id = %job.id, error = %error, "no handler for job");
                JobResult::Failure(error.to_string())
            }
        };

        let now = self.clock.now();
        match outcome {
            JobResult::Success => {
                job.mark_completed(started, now);
                self.store.update(job)?;
                debug!(job_id = %job.id, attempt = job.attempt, "job completed");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started, now);
                self.store.update(job)?;

                match &job.status {
                    JobStatus::DeadLettered { attempts, error: reason } => {
                        warn!(
                            job_id = %job.id,
                            kind = job.kind.type_name(),
                            attempts = *attempts,
                            error = %reason,
                            "job dead-lettered"
                        );
                        self.store.dead_letter(job.clone(), reason.clone(), now)?;
                    }
                    _ => {
                        debug!(
                            job_id = %job.id,
                            attempt = job.attempt,
                            retry_at = ?job.scheduled_at,
                            "job attempt failed, retry scheduled"
                        );
                    }
                }

                Err(JobExecutionError::Failed(error))
            }
        }
    }

    /// Claim and execute every job claimable at the clock's current time.
    ///
    /// Jobs rescheduled into the future by a failure are left for a later call.
    pub fn run_pending(&self, tenant_id: Option<TenantId>) -> Result<ExecutorStats, JobStoreError> {
        let mut stats = ExecutorStats::default();
        while let Some(mut job) = self.store.claim_next(tenant_id, self.clock.now())? {
            let result = self.execute_one(&mut job);
            if let Err(JobExecutionError::Store(e)) = result {
                return Err(e);
            }
            stats.record(&job, &result);
        }
        Ok(stats)
    }

    /// Spawn the executor in a background thread.
    pub fn spawn(self, config: JobExecutorConfig) -> io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        stats.lock().unwrap_or_else(|e| e.into_inner()).uptime_secs =
            start_time.elapsed().as_secs();

        match executor.store.claim_next(None, executor.clock.now()) {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempt,
                    "claimed job"
                );

                let result = executor.execute_one(&mut job);
                stats
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(&job, &result);

                if let Err(JobExecutionError::Store(e)) = result {
                    error!(executor = %config.name, job_id = %job.id, error = %e, "failed to persist job state");
                }
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %config.name, "job executor stopped");
}
