//! HTTP relay transport.
//!
//! Posts each rendered message as JSON to a mail relay endpoint. Any
//! transport error or non-2xx answer is a `DeliveryFailure`.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use storefront_notifications::{DeliveryFailure, EmailMessage, Mailer};

#[derive(Debug, Clone)]
pub struct HttpMailerConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpMailerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blocking HTTP mailer, meant to be called from the job executor thread.
///
/// The client is built on first use so that it is created on the calling
/// thread rather than inside an async runtime.
#[derive(Debug)]
pub struct HttpMailer {
    config: HttpMailerConfig,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpMailer {
    pub fn new(config: HttpMailerConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &HttpMailerConfig {
        &self.config
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, DeliveryFailure> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| DeliveryFailure::new(format!("mail client setup failed: {e}")))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Mailer for HttpMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryFailure> {
        let mut req = self.client()?.post(&self.config.endpoint).json(message);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .map_err(|e| DeliveryFailure::new(format!("mail relay unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DeliveryFailure::new(format!(
                "mail relay answered {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        debug!(to = %message.to, status = status.as_u16(), "mail relay accepted message");
        Ok(())
    }
}
