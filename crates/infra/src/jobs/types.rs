//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::TenantId;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Job kind, used to route a job to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Outbound email rendered from a named template (e.g. `email.order_confirmation`).
    Email { template: String },
    /// Generic/custom job
    Custom { kind: String },
}

impl JobKind {
    pub fn email(template: impl Into<String>) -> Self {
        Self::Email {
            template: template.into(),
        }
    }

    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::Email { template } => template,
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// Completed successfully
    Completed,
    /// Failed, a retry is scheduled
    Failed { error: String, attempt: u32 },
    /// Exhausted its attempts; no further retries
    DeadLettered { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
            JobStatus::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// base * 2^(attempt-1), capped at `max_delay`
    Exponential,
    /// base * attempt, capped at `max_delay`
    Linear,
}

/// Retry policy carried by every job.
///
/// `max_attempts` counts *total* executions, the first one included: a
/// policy of 3 runs a job at most three times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::order_notification()
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Same `delay` between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// 3 attempts, 30 seconds apart.
    pub fn order_notification() -> Self {
        Self::fixed(3, Duration::from_secs(30))
    }

    /// Delay to wait after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt).min(self.max_delay),
        }
    }

    /// Whether another attempt is allowed after `attempt` executions.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub kind: JobKind,
    /// JSON payload, opaque to the queue
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Executions started so far (0 while queued)
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant (retry backoff / delayed jobs)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// One record per finished attempt
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    pub fn new(
        tenant_id: TenantId,
        kind: JobKind,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Do not run before `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Failed { .. }) && self.is_ready(now)
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.scheduled_at = None;
        self.record_attempt(started_at, now, None);
    }

    /// Record a failed attempt and either schedule a retry or dead-letter.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.updated_at = now;
        self.record_attempt(started_at, now, Some(error.clone()));

        if !self.retry_policy.should_retry(self.attempt) {
            self.dead_lettered(error);
            return;
        }

        // A delay past chrono's range cannot be scheduled; give up instead of retrying early.
        let delay = self.retry_policy.delay_for_attempt(self.attempt);
        match chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
        {
            Some(retry_at) => {
                self.scheduled_at = Some(retry_at);
                self.status = JobStatus::Failed {
                    error,
                    attempt: self.attempt,
                };
            }
            None => self.dead_lettered(format!("{error} (retry delay {delay:?} out of range)")),
        }
    }

    fn dead_lettered(&mut self, error: String) {
        self.scheduled_at = None;
        self.status = JobStatus::DeadLettered {
            error,
            attempts: self.attempt,
        };
    }

    fn record_attempt(
        &mut self,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// The attempt failed; the retry policy decides what happens next.
    Failure(String),
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String, now: DateTime<Utc>) -> Self {
        Self {
            job,
            dead_lettered_at: now,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn test_job(policy: RetryPolicy) -> Job {
        Job::new(
            TenantId::new(),
            JobKind::email("email.order_confirmation"),
            serde_json::json!({"recipient": "buyer@example.com"}),
            t0(),
        )
        .with_retry_policy(policy)
    }

    #[test]
    fn default_policy_is_three_attempts_thirty_seconds_apart() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.strategy, BackoffStrategy::Fixed);
        for attempt in 1..=3 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(30));
        }
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn should_retry_counts_total_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = test_job(RetryPolicy::default());

        assert!(matches!(job.status, JobStatus::Pending));
        assert_eq!(job.attempt, 0);

        job.mark_running(t0());
        assert!(matches!(job.status, JobStatus::Running));
        assert_eq!(job.attempt, 1);

        job.mark_completed(t0(), t0() + chrono::Duration::milliseconds(40));
        assert!(matches!(job.status, JobStatus::Completed));
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
        assert_eq!(job.history[0].duration_ms, 40);
    }

    #[test]
    fn failed_attempt_schedules_retry_after_backoff() {
        let mut job = test_job(RetryPolicy::default());

        job.mark_running(t0());
        job.mark_failed("smtp down".to_string(), t0(), t0());

        assert_eq!(
            job.status,
            JobStatus::Failed {
                error: "smtp down".to_string(),
                attempt: 1
            }
        );
        assert_eq!(job.scheduled_at, Some(t0() + chrono::Duration::seconds(30)));
        assert!(!job.is_claimable(t0() + chrono::Duration::seconds(29)));
        assert!(job.is_claimable(t0() + chrono::Duration::seconds(30)));
    }

    #[test]
    fn exhausting_attempts_dead_letters() {
        let mut job = test_job(RetryPolicy::fixed(2, Duration::from_secs(30)));

        job.mark_running(t0());
        job.mark_failed("error 1".to_string(), t0(), t0());
        assert!(job.status.is_retriable());

        job.mark_running(t0());
        job.mark_failed("error 2".to_string(), t0(), t0());

        assert_eq!(
            job.status,
            JobStatus::DeadLettered {
                error: "error 2".to_string(),
                attempts: 2
            }
        );
        assert!(job.status.is_terminal());
        assert!(!job.is_claimable(t0() + chrono::Duration::hours(1)));
    }

    #[test]
    fn unschedulable_retry_delay_dead_letters_instead_of_panicking() {
        let mut job = test_job(RetryPolicy::fixed(3, Duration::from_secs(100_000_000_000_000)));

        job.mark_running(t0());
        job.mark_failed("relay down".to_string(), t0(), t0());

        match &job.status {
            JobStatus::DeadLettered { error, attempts } => {
                assert_eq!(*attempts, 1);
                assert!(error.starts_with("relay down"));
                assert!(error.contains("out of range"));
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
        assert_eq!(job.scheduled_at, None);
    }

    #[test]
    fn job_kind_routes_by_template_name() {
        assert_eq!(
            JobKind::email("email.order_confirmation").type_name(),
            "email.order_confirmation"
        );
        assert_eq!(JobKind::custom("reindex").type_name(), "reindex");
    }
}
