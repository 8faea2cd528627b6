//! Job storage implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use storefront_core::TenantId;

use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a queued, running or recently completed job by ID.
    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Persist the current state of a job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest job that is claimable at `now`, marking it running.
    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Move a job to the dead-letter queue.
    fn dead_letter(&self, job: Job, reason: String, now: DateTime<Utc>) -> Result<(), JobStoreError>;

    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Requeue a dead-lettered job with a fresh attempt budget.
    fn retry_dead_letter(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    fn delete_dead_letter(&self, tenant_id: TenantId, job_id: JobId) -> Result<(), JobStoreError>;

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(tenant_id, job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(tenant_id, now)
    }

    fn dead_letter(&self, job: Job, reason: String, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason, now)
    }

    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(tenant_id, limit)
    }

    fn retry_dead_letter(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        (**self).retry_dead_letter(tenant_id, job_id, now)
    }

    fn delete_dead_letter(&self, tenant_id: TenantId, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).delete_dead_letter(tenant_id, job_id)
    }

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError> {
        (**self).stats(tenant_id)
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Completed jobs kept for lookup when no retention is configured.
pub const DEFAULT_COMPLETED_RETENTION: usize = 1000;

/// Most recently completed jobs, oldest evicted first.
#[derive(Debug)]
struct CompletedJobs {
    capacity: usize,
    order: VecDeque<JobId>,
    jobs: HashMap<JobId, Job>,
}

impl CompletedJobs {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            jobs: HashMap::new(),
        }
    }

    fn push(&mut self, job: Job) {
        if self.capacity == 0 {
            return;
        }
        let id = job.id;
        if self.jobs.insert(id, job).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }
}

/// In-memory job store.
///
/// Only queued, running and failed jobs stay in the claimable map. Completed
/// jobs move to a bounded ring so they can still be looked up for a while,
/// and dead-lettered jobs move to the dead-letter map.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    completed: RwLock<CompletedJobs>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::with_completed_retention(DEFAULT_COMPLETED_RETENTION)
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` completed jobs (0 drops them on completion).
    pub fn with_completed_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            completed: RwLock::new(CompletedJobs::new(retention)),
            dead_letters: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs_read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn jobs_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }

    fn completed_read(&self) -> Result<RwLockReadGuard<'_, CompletedJobs>, JobStoreError> {
        self.completed.read().map_err(|_| poisoned())
    }

    fn completed_write(&self) -> Result<RwLockWriteGuard<'_, CompletedJobs>, JobStoreError> {
        self.completed.write().map_err(|_| poisoned())
    }

    fn dls_read(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<JobId, DeadLetterEntry>>, JobStoreError> {
        self.dead_letters.read().map_err(|_| poisoned())
    }

    fn dls_write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<JobId, DeadLetterEntry>>, JobStoreError> {
        self.dead_letters.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs_write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs_read()?;
        let completed = self.completed_read()?;
        match jobs.get(&job_id).or_else(|| completed.jobs.get(&job_id)) {
            Some(job) if job.tenant_id == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(JobStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_write()?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }

        if job.status == JobStatus::Completed {
            jobs.remove(&job.id);
            self.completed_write()?.push(job.clone());
        } else {
            jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs_write()?;

        // Oldest claimable job first (FIFO by creation time).
        let next = jobs
            .values()
            .filter(|j| j.is_claimable(now) && tenant_id.is_none_or(|t| j.tenant_id == t))
            .min_by_key(|j| (j.created_at, j.id.0))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            let job = jobs.get_mut(&id)?;
            job.mark_running(now);
            Some(job.clone())
        }))
    }

    fn dead_letter(&self, mut job: Job, reason: String, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let mut dls = self.dls_write()?;

        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = now;

        jobs.remove(&job.id);
        dls.insert(job.id, DeadLetterEntry::new(job, reason, now));

        Ok(())
    }

    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.dls_read()?;
        let mut result: Vec<_> = dls
            .values()
            .filter(|e| e.job.tenant_id == tenant_id)
            .cloned()
            .collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let mut dls = self.dls_write()?;

        match dls.get(&job_id) {
            None => return Err(JobStoreError::NotFound(job_id)),
            Some(entry) if entry.job.tenant_id != tenant_id => {
                return Err(JobStoreError::TenantIsolation);
            }
            Some(_) => {}
        }

        let Some(entry) = dls.remove(&job_id) else {
            return Err(JobStoreError::NotFound(job_id));
        };

        let mut job = entry.job;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.updated_at = now;
        job.history.clear();

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn delete_dead_letter(&self, tenant_id: TenantId, job_id: JobId) -> Result<(), JobStoreError> {
        let mut dls = self.dls_write()?;

        let entry = dls.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if entry.job.tenant_id != tenant_id {
            return Err(JobStoreError::TenantIsolation);
        }

        dls.remove(&job_id);
        Ok(())
    }

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs_read()?;
        let completed = self.completed_read()?;
        let dls = self.dls_read()?;

        let mut stats = JobStats::default();

        let tenant_jobs = jobs.values().chain(completed.jobs.values());
        for job in tenant_jobs.filter(|j| j.tenant_id == tenant_id) {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }

        stats.dead_lettered += dls.values().filter(|e| e.job.tenant_id == tenant_id).count();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn test_job(tenant: TenantId) -> Job {
        Job::new(tenant, JobKind::custom("test"), serde_json::json!({}), t0())
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let job_id = store.enqueue(test_job(tenant)).unwrap();

        let claimed = store.claim_next(Some(tenant), t0()).unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert!(matches!(claimed.status, JobStatus::Running));
        assert_eq!(claimed.attempt, 1);

        // Running jobs are not claimable again.
        assert!(store.claim_next(Some(tenant), t0()).unwrap().is_none());
    }

    #[test]
    fn claims_oldest_first() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let mut later = test_job(tenant);
        later.created_at = t0() + chrono::Duration::seconds(5);
        let earlier = test_job(tenant);
        let earlier_id = earlier.id;

        store.enqueue(later).unwrap();
        store.enqueue(earlier).unwrap();

        let claimed = store.claim_next(None, t0() + chrono::Duration::minutes(1)).unwrap().unwrap();
        assert_eq!(claimed.id, earlier_id);
    }

    #[test]
    fn scheduled_jobs_wait_for_their_time() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        store
            .enqueue(test_job(tenant).scheduled_at(t0() + chrono::Duration::seconds(30)))
            .unwrap();

        assert!(store.claim_next(Some(tenant), t0()).unwrap().is_none());
        assert!(
            store
                .claim_next(Some(tenant), t0() + chrono::Duration::seconds(30))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn tenant_isolation() {
        let store = InMemoryJobStore::new();
        let tenant1 = TenantId::new();
        let tenant2 = TenantId::new();

        let job_id = store.enqueue(test_job(tenant1)).unwrap();

        assert!(matches!(
            store.get(tenant2, job_id),
            Err(JobStoreError::TenantIsolation)
        ));
        assert!(store.claim_next(Some(tenant2), t0()).unwrap().is_none());
    }

    #[test]
    fn dead_letter_flow() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let job = test_job(tenant);
        let job_id = job.id;
        store.enqueue(job).unwrap();

        let mut claimed = store.claim_next(Some(tenant), t0()).unwrap().unwrap();
        claimed.mark_failed("smtp down".to_string(), t0(), t0());

        store
            .dead_letter(claimed, "max attempts exceeded".to_string(), t0())
            .unwrap();

        assert!(store.get(tenant, job_id).unwrap().is_none());

        let dls = store.list_dead_letters(tenant, 10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].job.id, job_id);
        assert_eq!(dls[0].reason, "max attempts exceeded");

        assert!(matches!(
            store.retry_dead_letter(TenantId::new(), job_id, t0()),
            Err(JobStoreError::TenantIsolation)
        ));

        let retried = store.retry_dead_letter(tenant, job_id, t0()).unwrap();
        assert!(matches!(retried.status, JobStatus::Pending));
        assert_eq!(retried.attempt, 0);
        assert!(retried.history.is_empty());

        assert!(store.list_dead_letters(tenant, 10).unwrap().is_empty());
        assert!(store.claim_next(Some(tenant), t0()).unwrap().is_some());
    }

    #[test]
    fn delete_dead_letter_removes_entry() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        let job = test_job(tenant);
        let job_id = job.id;
        store.enqueue(job.clone()).unwrap();
        store.dead_letter(job, "gave up".to_string(), t0()).unwrap();

        store.delete_dead_letter(tenant, job_id).unwrap();
        assert!(matches!(
            store.delete_dead_letter(tenant, job_id),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        for _ in 0..5 {
            store.enqueue(test_job(tenant)).unwrap();
        }

        let stats = store.stats(tenant).unwrap();
        assert_eq!(stats.pending, 5);

        store.claim_next(Some(tenant), t0()).unwrap();
        store.claim_next(Some(tenant), t0()).unwrap();

        let stats = store.stats(tenant).unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
        assert_eq!(store.stats(TenantId::new()).unwrap(), JobStats::default());
    }

    fn complete_one(store: &InMemoryJobStore, tenant: TenantId) -> JobId {
        let id = store.enqueue(test_job(tenant)).unwrap();
        let mut job = store.claim_next(Some(tenant), t0()).unwrap().unwrap();
        job.mark_completed(t0(), t0());
        store.update(&job).unwrap();
        id
    }

    #[test]
    fn completed_jobs_leave_the_queue_and_are_bounded() {
        let store = InMemoryJobStore::with_completed_retention(3);
        let tenant = TenantId::new();

        let ids: Vec<JobId> = (0..50).map(|_| complete_one(&store, tenant)).collect();

        let stats = store.stats(tenant).unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending + stats.running, 0);
        assert!(store.claim_next(None, t0()).unwrap().is_none());

        assert!(store.get(tenant, ids[46]).unwrap().is_none());
        for id in &ids[47..] {
            let job = store.get(tenant, *id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
    }

    #[test]
    fn zero_retention_drops_completed_jobs() {
        let store = InMemoryJobStore::with_completed_retention(0);
        let tenant = TenantId::new();

        let id = complete_one(&store, tenant);

        assert!(store.get(tenant, id).unwrap().is_none());
        assert_eq!(store.stats(tenant).unwrap(), JobStats::default());
    }
}
