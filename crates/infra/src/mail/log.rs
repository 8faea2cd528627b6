use tracing::info;

use storefront_notifications::{DeliveryFailure, EmailMessage, Mailer};

/// Development transport: logs the message instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryFailure> {
        info!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            body = %message.text_body,
            "email message (log transport)"
        );
        Ok(())
    }
}
