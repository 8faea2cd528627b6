//! Order confirmation emails as queued jobs.
//!
//! Enqueueing is fire-and-forget: the caller gets a `JobId` and never waits
//! for delivery. The executor runs each attempt through the dispatcher and
//! the job's `RetryPolicy` decides whether another attempt follows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use storefront_core::TenantId;
use storefront_notifications::{Mailer, NotificationJob, OrderNotificationDispatcher};

use crate::jobs::{Job, JobExecutor, JobId, JobKind, JobResult, JobStore, JobStoreError, RetryPolicy};

/// Job type name routed to the order confirmation handler.
pub const ORDER_CONFIRMATION: &str = "email.order_confirmation";

pub fn order_confirmation_kind() -> JobKind {
    JobKind::email(ORDER_CONFIRMATION)
}

/// Queue one order confirmation email.
pub fn enqueue_order_confirmation<S: JobStore + ?Sized>(
    store: &S,
    tenant_id: TenantId,
    notification: &NotificationJob,
    policy: RetryPolicy,
    now: DateTime<Utc>,
) -> Result<JobId, JobStoreError> {
    let max_attempts = policy.max_attempts;
    let job = Job::new(tenant_id, order_confirmation_kind(), notification.to_json(), now)
        .with_retry_policy(policy);
    let job_id = store.enqueue(job)?;

    info!(
        tenant_id = %tenant_id,
        job_id = %job_id,
        recipient = %notification.recipient,
        max_attempts,
        "order confirmation queued"
    );
    Ok(job_id)
}

/// Route order confirmation jobs to `dispatcher`.
///
/// A payload that does not decode counts as a failed attempt like any other.
pub fn register_order_confirmation<S, M>(
    executor: &mut JobExecutor<S>,
    dispatcher: Arc<OrderNotificationDispatcher<M>>,
) where
    S: JobStore + 'static,
    M: Mailer + 'static,
{
    executor.register_handler(ORDER_CONFIRMATION, move |job: &Job| {
        let notification = match NotificationJob::from_json(&job.payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "malformed order confirmation payload");
                return JobResult::Failure(format!("malformed payload: {e}"));
            }
        };

        match dispatcher.deliver(&notification) {
            Ok(()) => JobResult::Success,
            Err(failure) => JobResult::Failure(failure.to_string()),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use storefront_core::{EmailAddress, ManualClock};
    use storefront_notifications::testing::LogCapture;
    use storefront_notifications::{RecordingMailer, SenderConfig};

    use crate::jobs::{InMemoryJobStore, JobStatus};

    const FAILED: &str = "order confirmation email failed";

    struct Harness {
        store: Arc<InMemoryJobStore>,
        clock: Arc<ManualClock>,
        mailer: Arc<RecordingMailer>,
        executor: JobExecutor<Arc<InMemoryJobStore>>,
        tenant: TenantId,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 3, 14, 0, 0).unwrap()
    }

    fn harness(mailer: RecordingMailer) -> Harness {
        let store = InMemoryJobStore::arc();
        let clock = Arc::new(ManualClock::new(t0()));
        let mailer = Arc::new(mailer);
        let mut executor = JobExecutor::with_clock(store.clone(), clock.clone());
        register_order_confirmation(
            &mut executor,
            Arc::new(OrderNotificationDispatcher::new(
                mailer.clone(),
                SenderConfig::default(),
            )),
        );
        Harness {
            store,
            clock,
            mailer,
            executor,
            tenant: TenantId::new(),
        }
    }

    fn notification() -> NotificationJob {
        NotificationJob::new(
            EmailAddress::parse("client@example.tn").unwrap(),
            serde_json::json!({"reference": "2024/0001", "customer_name": "Nour"})
                .as_object()
                .cloned()
                .unwrap(),
        )
    }

    fn enqueue(h: &Harness) -> JobId {
        enqueue_order_confirmation(
            &*h.store,
            h.tenant,
            &notification(),
            RetryPolicy::order_notification(),
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn succeeds_first_time() {
        let h = harness(RecordingMailer::new());
        let job_id = enqueue(&h);

        let stats = h.executor.run_pending(None).unwrap();

        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(h.mailer.sent()[0].from, "contact@protein.tn");
        let job = h.store.get(h.tenant, job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn two_failures_then_success_thirty_seconds_apart() {
        let capture = LogCapture::new();
        let h = harness(RecordingMailer::failing_first(2));
        let job_id = enqueue(&h);

        capture.run(|| {
            h.executor.run_pending(None).unwrap();

            // Nothing is due before the backoff elapses.
            h.clock.advance(chrono::Duration::seconds(29));
            assert_eq!(h.executor.run_pending(None).unwrap().jobs_processed, 0);

            h.clock.advance(chrono::Duration::seconds(1));
            h.executor.run_pending(None).unwrap();

            h.clock.advance(chrono::Duration::seconds(30));
            h.executor.run_pending(None).unwrap();
        });

        assert_eq!(capture.events_with_message(FAILED).len(), 2);
        assert_eq!(h.mailer.attempts(), 3);
        assert_eq!(h.mailer.sent().len(), 1);

        let job = h.store.get(h.tenant, job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt, 3);
        let starts: Vec<_> = job.history.iter().map(|a| a.started_at).collect();
        assert_eq!(
            starts,
            [
                t0(),
                t0() + chrono::Duration::seconds(30),
                t0() + chrono::Duration::seconds(60)
            ]
        );
    }

    #[test]
    fn three_failures_dead_letter_without_a_fourth_attempt() {
        let capture = LogCapture::new();
        let h = harness(RecordingMailer::always_failing());
        let job_id = enqueue(&h);

        capture.run(|| {
            for _ in 0..5 {
                h.executor.run_pending(None).unwrap();
                h.clock.advance(chrono::Duration::seconds(30));
            }
        });

        let failures = capture.events_with_message(FAILED);
        assert_eq!(failures.len(), 3);
        assert!(failures
            .iter()
            .all(|e| e.field("recipient") == Some("client@example.tn")
                && e.field("error") == Some("delivery failed: transport unavailable")));
        assert_eq!(h.mailer.attempts(), 3);

        assert!(h.store.get(h.tenant, job_id).unwrap().is_none());
        let dead = h.store.list_dead_letters(h.tenant, 10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].job.status,
            JobStatus::DeadLettered {
                error: "delivery failed: transport unavailable".to_string(),
                attempts: 3
            }
        );
    }

    #[test]
    fn every_attempt_renders_a_fresh_message() {
        let h = harness(RecordingMailer::failing_first(1));
        enqueue(&h);

        h.executor.run_pending(None).unwrap();
        h.clock.advance(chrono::Duration::seconds(30));
        h.executor.run_pending(None).unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Order confirmation 2024/0001");
    }

    #[test]
    fn malformed_payload_fails_and_is_retried() {
        let h = harness(RecordingMailer::new());
        let job = Job::new(
            h.tenant,
            order_confirmation_kind(),
            serde_json::json!({"recipient": "not-an-email"}),
            t0(),
        )
        .with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(30)));
        let job_id = h.store.enqueue(job).unwrap();

        h.executor.run_pending(None).unwrap();
        let job = h.store.get(h.tenant, job_id).unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::Failed { attempt: 1, .. }));
        assert_eq!(h.mailer.attempts(), 0);
    }

    #[test]
    fn queued_payload_round_trips_the_notification() {
        let h = harness(RecordingMailer::new());
        let notification = notification().with_sender_label("Protein Shop");
        let job_id = enqueue_order_confirmation(
            &*h.store,
            h.tenant,
            &notification,
            RetryPolicy::order_notification(),
            t0(),
        )
        .unwrap();

        let job = h.store.get(h.tenant, job_id).unwrap().unwrap();
        assert_eq!(job.kind.type_name(), ORDER_CONFIRMATION);
        assert_eq!(NotificationJob::from_json(&job.payload).unwrap(), notification);
        assert_eq!(job.retry_policy.max_attempts, 3);
        assert_eq!(job.retry_policy.base_delay, Duration::from_secs(30));
    }
}
