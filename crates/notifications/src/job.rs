//! Notification job payload and sender configuration.

use serde::{Deserialize, Serialize};

use storefront_core::EmailAddress;

/// Fallback "from" identity when a job carries no sender label.
pub const DEFAULT_SENDER_ADDRESS: &str = "contact@protein.tn";

/// Template variables handed over by the enqueuing caller.
pub type TemplatePayload = serde_json::Map<String, serde_json::Value>;

/// One order-confirmation email to deliver.
///
/// This is what travels through the job queue as the job payload; the attempt
/// counter and backoff live on the queue's job record, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub recipient: EmailAddress,
    #[serde(default)]
    pub payload: TemplatePayload,
    #[serde(default)]
    pub sender_label: Option<String>,
}

impl NotificationJob {
    pub fn new(recipient: EmailAddress, payload: TemplatePayload) -> Self {
        Self {
            recipient,
            payload,
            sender_label: None,
        }
    }

    pub fn with_sender_label(mut self, label: impl Into<String>) -> Self {
        self.sender_label = Some(label.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// Process-wide sender configuration, injected into the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    pub default_address: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            default_address: DEFAULT_SENDER_ADDRESS.to_string(),
        }
    }
}

impl SenderConfig {
    pub fn new(default_address: impl Into<String>) -> Self {
        Self {
            default_address: default_address.into(),
        }
    }

    /// The "from" identity for a job: its label when non-blank, else the default.
    pub fn resolve(&self, label: Option<&str>) -> String {
        match label.map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => self.default_address.clone(),
        }
    }
}
