//! Mail transport port.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use storefront_core::EmailAddress;

/// A fully rendered email, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: EmailAddress,
    pub from: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// The transport did not accept the message.
///
/// Every failure is treated the same way by the queue (retried until the
/// policy is exhausted); there is no transient/permanent split.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("delivery failed: {reason}")]
pub struct DeliveryFailure {
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outbound mail transport.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryFailure>;
}

impl<M> Mailer for Arc<M>
where
    M: Mailer + ?Sized,
{
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryFailure> {
        (**self).send(message)
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    attempts: usize,
    fail_next: usize,
    fail_always: bool,
    sent: Vec<EmailMessage>,
}

/// In-memory mailer for tests/dev.
///
/// Records every accepted message and can be scripted to fail.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    state: Mutex<RecordingState>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` sends, then accept.
    pub fn failing_first(n: usize) -> Self {
        let mailer = Self::default();
        mailer.lock().fail_next = n;
        mailer
    }

    /// Fail every send.
    pub fn always_failing() -> Self {
        let mailer = Self::default();
        mailer.lock().fail_always = true;
        mailer
    }

    /// Number of send calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryFailure> {
        let mut state = self.lock();
        state.attempts += 1;

        if state.fail_always {
            return Err(DeliveryFailure::new("transport unavailable"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DeliveryFailure::new("transport unavailable"));
        }

        state.sent.push(message.clone());
        Ok(())
    }
}
