//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use storefront_infra::jobs::{RetryPolicy, DEFAULT_COMPLETED_RETENTION};
use storefront_infra::orders::ReferenceStrategy;
use storefront_notifications::DEFAULT_SENDER_ADDRESS;
use storefront_observability::LogFormat;

/// Longest accepted retry backoff for confirmation emails.
pub const MAX_NOTIFY_BACKOFF_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("{0} must be set when MAIL_TRANSPORT=http")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl ToString) -> Self {
        Self::Invalid {
            key,
            message: message.to_string(),
        }
    }
}

/// Where confirmation emails go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailTransport {
    /// Write messages to the log (development).
    Log,
    /// POST messages to a mail relay.
    Http { endpoint: String, token: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; in-memory order storage when absent.
    pub database_url: Option<String>,
    pub log_format: LogFormat,
    pub default_sender: String,
    pub mail_transport: MailTransport,
    pub notify_max_attempts: u32,
    pub notify_backoff: Duration,
    pub reference_strategy: ReferenceStrategy,
    pub job_poll_interval: Duration,
    /// Completed jobs kept for `GET /jobs/:id`.
    pub completed_job_retention: usize,
    /// Currency label appended to amounts in confirmation emails.
    pub currency: String,
    /// Offset of the business timezone; decides the year in order references.
    pub business_offset: FixedOffset,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            log_format: LogFormat::default(),
            default_sender: DEFAULT_SENDER_ADDRESS.to_string(),
            mail_transport: MailTransport::Log,
            notify_max_attempts: 3,
            notify_backoff: Duration::from_secs(30),
            reference_strategy: ReferenceStrategy::default(),
            job_poll_interval: Duration::from_millis(250),
            completed_job_retention: DEFAULT_COMPLETED_RETENTION,
            currency: "TND".to_string(),
            business_offset: Utc.fix(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v.parse().map_err(|e| ConfigError::invalid("BIND_ADDR", e))?;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(v) = get("LOG_FORMAT") {
            config.log_format = v.parse().map_err(|e| ConfigError::invalid("LOG_FORMAT", e))?;
        }
        if let Some(v) = get("MAIL_DEFAULT_SENDER") {
            config.default_sender = v;
        }
        config.mail_transport = match get("MAIL_TRANSPORT").as_deref() {
            None | Some("log") => MailTransport::Log,
            Some("http") => MailTransport::Http {
                endpoint: get("MAIL_HTTP_ENDPOINT").ok_or(ConfigError::Missing("MAIL_HTTP_ENDPOINT"))?,
                token: get("MAIL_HTTP_TOKEN"),
            },
            Some(other) => {
                return Err(ConfigError::invalid(
                    "MAIL_TRANSPORT",
                    format!("`{other}` (expected `log` or `http`)"),
                ));
            }
        };
        if let Some(v) = get("NOTIFY_MAX_ATTEMPTS") {
            let n: u32 = v.parse().map_err(|e| ConfigError::invalid("NOTIFY_MAX_ATTEMPTS", e))?;
            if n == 0 {
                return Err(ConfigError::invalid("NOTIFY_MAX_ATTEMPTS", "must be at least 1"));
            }
            config.notify_max_attempts = n;
        }
        if let Some(v) = get("NOTIFY_BACKOFF_SECS") {
            let secs: u64 = v.parse().map_err(|e| ConfigError::invalid("NOTIFY_BACKOFF_SECS", e))?;
            if secs > MAX_NOTIFY_BACKOFF_SECS {
                return Err(ConfigError::invalid(
                    "NOTIFY_BACKOFF_SECS",
                    format!("must be at most {MAX_NOTIFY_BACKOFF_SECS}"),
                ));
            }
            config.notify_backoff = Duration::from_secs(secs);
        }
        if let Some(v) = get("ORDER_REFERENCE_STRATEGY") {
            config.reference_strategy = v
                .parse()
                .map_err(|e| ConfigError::invalid("ORDER_REFERENCE_STRATEGY", e))?;
        }
        if let Some(v) = get("JOB_POLL_INTERVAL_MS") {
            let ms: u64 = v.parse().map_err(|e| ConfigError::invalid("JOB_POLL_INTERVAL_MS", e))?;
            config.job_poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = get("JOB_COMPLETED_RETENTION") {
            config.completed_job_retention = v
                .parse()
                .map_err(|e| ConfigError::invalid("JOB_COMPLETED_RETENTION", e))?;
        }
        if let Some(v) = get("ORDER_CURRENCY") {
            config.currency = v;
        }
        if let Some(v) = get("ORDER_UTC_OFFSET") {
            config.business_offset = v
                .parse()
                .map_err(|e| ConfigError::invalid("ORDER_UTC_OFFSET", e))?;
        }

        Ok(config)
    }

    /// Retry policy applied to every queued confirmation email.
    pub fn notify_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.notify_max_attempts, self.notify_backoff)
    }
}
