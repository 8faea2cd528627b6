use std::sync::{Arc, Mutex};

use storefront_core::{Clock, EmailAddress, SystemClock, TenantId};
use storefront_infra::{
    jobs::{
        ExecutorStats, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobId,
        JobStore, JobStoreError, RetryPolicy,
    },
    mail::{HttpMailer, HttpMailerConfig, LogMailer},
    notifications::{enqueue_order_confirmation, register_order_confirmation},
    orders::{InMemoryOrderStore, OrderPlacement, OrderStore, PostgresOrderStore},
};
use storefront_notifications::{
    order_confirmation_payload, Mailer, NotificationJob, OrderNotificationDispatcher, SenderConfig,
};
use storefront_orders::Order;

use crate::config::{AppConfig, MailTransport};

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub orders: OrderPlacement<Arc<dyn OrderStore>>,
    pub jobs: Arc<dyn JobStore>,
    pub executor_stats: Arc<Mutex<ExecutorStats>>,
    pub clock: Arc<dyn Clock>,
    notify_policy: RetryPolicy,
    currency: String,
}

impl AppServices {
    /// Queue a confirmation email describing `order`.
    ///
    /// The recipient falls back to the customer's email; `None` when neither is known.
    pub fn enqueue_confirmation(
        &self,
        tenant_id: TenantId,
        order: &Order,
        recipient: Option<EmailAddress>,
        sender_label: Option<String>,
    ) -> Option<Result<JobId, JobStoreError>> {
        let recipient = recipient.or_else(|| order.customer().email.clone())?;
        let mut notification =
            NotificationJob::new(recipient, order_confirmation_payload(order, &self.currency));
        notification.sender_label = sender_label;

        Some(enqueue_order_confirmation(
            &*self.jobs,
            tenant_id,
            &notification,
            self.notify_policy.clone(),
            self.clock.now(),
        ))
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn build_mailer(config: &AppConfig) -> Arc<dyn Mailer> {
    match &config.mail_transport {
        MailTransport::Log => Arc::new(LogMailer),
        MailTransport::Http { endpoint, token } => {
            let mut http = HttpMailerConfig::new(endpoint.clone());
            if let Some(token) = token {
                http = http.with_token(token.clone());
            }
            Arc::new(HttpMailer::new(http))
        }
    }
}

async fn build_order_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresOrderStore::connect(url).await?;
            tracing::info!("using postgres order store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; orders are kept in memory");
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
    }
}

/// Wire stores, the placement service, and the background job executor.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<(AppServices, JobExecutorHandle)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let order_store = build_order_store(config).await?;
    let orders = OrderPlacement::new(order_store, clock.clone())
        .with_strategy(config.reference_strategy)
        .with_business_offset(config.business_offset);

    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::with_completed_retention(
        config.completed_job_retention,
    ));
    let dispatcher = Arc::new(OrderNotificationDispatcher::new(
        build_mailer(config),
        SenderConfig::new(config.default_sender.clone()),
    ));

    let mut executor = JobExecutor::with_clock(jobs.clone(), clock.clone());
    register_order_confirmation(&mut executor, dispatcher);
    let handle = executor.spawn(
        JobExecutorConfig::default()
            .with_name("notification-executor")
            .with_poll_interval(config.job_poll_interval),
    )?;

    let services = AppServices {
        orders,
        jobs,
        executor_stats: handle.stats_source(),
        clock,
        notify_policy: config.notify_policy(),
        currency: config.currency.clone(),
    };

    Ok((services, handle))
}
