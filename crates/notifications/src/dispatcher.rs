//! Order confirmation delivery (one attempt per call).

use tracing::{info, warn};

use storefront_orders::Order;

use crate::job::{NotificationJob, SenderConfig, TemplatePayload};
use crate::mailer::{DeliveryFailure, Mailer};
use crate::template::OrderConfirmationTemplate;

/// Renders and sends one order confirmation per `deliver` call.
///
/// Retrying is the job queue's business: a failed attempt is logged once and
/// handed back so the queue can schedule the next one. The email is rendered
/// again on every attempt.
#[derive(Debug)]
pub struct OrderNotificationDispatcher<M> {
    mailer: M,
    sender: SenderConfig,
    template: OrderConfirmationTemplate,
}

impl<M: Mailer> OrderNotificationDispatcher<M> {
    pub fn new(mailer: M, sender: SenderConfig) -> Self {
        Self {
            mailer,
            sender,
            template: OrderConfirmationTemplate::new(),
        }
    }

    pub fn sender(&self) -> &SenderConfig {
        &self.sender
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryFailure> {
        let from = self.sender.resolve(job.sender_label.as_deref());
        let message = self.template.render(&job.recipient, &from, &job.payload);

        match self.mailer.send(&message) {
            Ok(()) => {
                info!(
                    recipient = %job.recipient,
                    subject = %message.subject,
                    "order confirmation email sent"
                );
                Ok(())
            }
            Err(error) => {
                warn!(
                    recipient = %job.recipient,
                    error = %error,
                    "order confirmation email failed"
                );
                Err(error)
            }
        }
    }
}

/// Template variables describing `order`.
///
/// Amounts are stored in minor units (1/1000) and rendered with three
/// decimals followed by `currency`.
pub fn order_confirmation_payload(order: &Order, currency: &str) -> TemplatePayload {
    let lines = order
        .lines()
        .iter()
        .map(|line| {
            serde_json::json!({
                "line_no": line.line_no,
                "product_name": line.product_name,
                "quantity": line.quantity,
                "unit_price": format_amount(line.unit_price, currency),
                "subtotal": format_amount(line.subtotal(), currency),
            })
        })
        .collect::<Vec<_>>();

    let mut payload = TemplatePayload::new();
    payload.insert("order_id".into(), order.id_typed().to_string().into());
    payload.insert(
        "reference".into(),
        order
            .reference()
            .map(|r| r.to_string())
            .unwrap_or_default()
            .into(),
    );
    payload.insert("status".into(), order.status().as_str().into());
    payload.insert("customer_name".into(), order.customer().name.clone().into());
    if let Some(email) = &order.customer().email {
        payload.insert("customer_email".into(), email.to_string().into());
    }
    payload.insert("lines".into(), lines.into());
    payload.insert("total".into(), format_amount(order.total(), currency).into());
    if let Some(note) = order.note() {
        payload.insert("note".into(), note.into());
    }
    if let Some(placed_at) = order.placed_at() {
        payload.insert("placed_at".into(), placed_at.to_rfc3339().into());
    }
    payload
}

pub fn format_amount(minor_units: u64, currency: &str) -> String {
    let amount = format!("{}.{:03}", minor_units / 1000, minor_units % 1000);
    if currency.is_empty() {
        amount
    } else {
        format!("{amount} {currency}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use storefront_core::{Aggregate, AggregateId, EmailAddress, TenantId};
    use storefront_orders::{CustomerInfo, NewOrderLine, OrderCommand, OrderId, OrderReference, PlaceOrder};

    use crate::mailer::RecordingMailer;
    use crate::testing::LogCapture;

    fn job(sender_label: Option<&str>) -> NotificationJob {
        let mut job = NotificationJob::new(
            EmailAddress::parse("buyer@example.com").unwrap(),
            serde_json::json!({"reference": "2024/0007"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        job.sender_label = sender_label.map(str::to_string);
        job
    }

    fn placed_order() -> Order {
        let order_id = OrderId::new(AggregateId::new());
        let mut order = Order::empty(order_id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id: TenantId::new(),
                order_id,
                reference: OrderReference::next(2024, 6),
                status: None,
                customer: CustomerInfo {
                    name: "Amine".to_string(),
                    email: Some(EmailAddress::parse("amine@example.com").unwrap()),
                    phone: None,
                    address: None,
                },
                lines: vec![NewOrderLine {
                    product_name: "Whey 2kg".to_string(),
                    quantity: 2,
                    unit_price: 120_500,
                }],
                note: Some("ring twice".to_string()),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order
    }

    #[test]
    fn null_sender_label_uses_default_address() {
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher = OrderNotificationDispatcher::new(mailer.clone(), SenderConfig::default());

        dispatcher.deliver(&job(None)).unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "contact@protein.tn");
        assert_eq!(sent[0].subject, "Order confirmation 2024/0007");
    }

    #[test]
    fn sender_label_becomes_from_identity() {
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher = OrderNotificationDispatcher::new(mailer.clone(), SenderConfig::default());

        dispatcher.deliver(&job(Some("Protein Shop"))).unwrap();

        assert_eq!(mailer.sent()[0].from, "Protein Shop");
    }

    #[test]
    fn failure_is_logged_with_recipient_and_error_then_returned() {
        let capture = LogCapture::new();
        let mailer = Arc::new(RecordingMailer::always_failing());
        let dispatcher = OrderNotificationDispatcher::new(mailer.clone(), SenderConfig::default());

        let result = capture.run(|| dispatcher.deliver(&job(None)));

        assert_eq!(result, Err(DeliveryFailure::new("transport unavailable")));
        let failures = capture.events_with_message("order confirmation email failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field("recipient"), Some("buyer@example.com"));
        assert_eq!(
            failures[0].field("error"),
            Some("delivery failed: transport unavailable")
        );
    }

    #[test]
    fn success_logs_no_failure() {
        let capture = LogCapture::new();
        let dispatcher =
            OrderNotificationDispatcher::new(RecordingMailer::new(), SenderConfig::default());

        capture.run(|| dispatcher.deliver(&job(None))).unwrap();

        assert!(capture.events_with_message("order confirmation email failed").is_empty());
        assert_eq!(capture.events_with_message("order confirmation email sent").len(), 1);
    }

    #[test]
    fn payload_describes_the_order() {
        let order = placed_order();
        let payload = order_confirmation_payload(&order, "TND");

        assert_eq!(payload["reference"], "2024/0007");
        assert_eq!(payload["status"], "new_order");
        assert_eq!(payload["customer_name"], "Amine");
        assert_eq!(payload["customer_email"], "amine@example.com");
        assert_eq!(payload["total"], "241.000 TND");
        assert_eq!(payload["note"], "ring twice");
        assert_eq!(payload["lines"][0]["unit_price"], "120.500 TND");
        assert_eq!(payload["lines"][0]["quantity"], 2);
    }

    #[test]
    fn amounts_use_three_decimals() {
        assert_eq!(format_amount(0, "TND"), "0.000 TND");
        assert_eq!(format_amount(7, ""), "0.007");
        assert_eq!(format_amount(1_234_560, "TND"), "1234.560 TND");
    }
}
