//! Background job system with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped and routed by kind
//! - Retry policy counts total attempts; the delay is applied between them
//! - Jobs that exhaust their attempts move to the dead-letter queue
//! - Dead letters can be inspected, requeued, or discarded
//!
//! ## Components
//!
//! - `Job`: payload plus attempt history and scheduling
//! - `JobStore`: persistence for jobs and dead letters
//! - `JobExecutor`: runs claimed jobs against registered handlers

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{
    ExecutorStats, JobExecutionError, JobExecutor, JobExecutorConfig, JobExecutorHandle,
};
pub use store::{DEFAULT_COMPLETED_RETENTION, InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobAttemptRecord, JobId, JobKind, JobResult, JobStatus,
    RetryPolicy,
};
