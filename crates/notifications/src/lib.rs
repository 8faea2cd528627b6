//! Order notification delivery.
//!
//! - `NotificationJob`: what gets queued (recipient, template variables, sender label)
//! - `OrderConfirmationTemplate`: renders the confirmation email
//! - `Mailer`: outbound transport port (HTTP/log adapters live in `storefront-infra`)
//! - `OrderNotificationDispatcher`: one render + send attempt, failures logged and returned

pub mod dispatcher;
pub mod job;
pub mod mailer;
pub mod template;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use dispatcher::{format_amount, order_confirmation_payload, OrderNotificationDispatcher};
pub use job::{NotificationJob, SenderConfig, TemplatePayload, DEFAULT_SENDER_ADDRESS};
pub use mailer::{DeliveryFailure, EmailMessage, Mailer, RecordingMailer};
pub use template::OrderConfirmationTemplate;
