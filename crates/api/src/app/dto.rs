use axum::http::StatusCode;
use serde::Deserialize;

use storefront_core::EmailAddress;
use storefront_infra::jobs::{DeadLetterEntry, Job};
use storefront_infra::orders::NewOrder;
use storefront_orders::{CustomerInfo, NewOrderLine, Order, OrderStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub status: Option<String>,
    pub customer: CustomerRequest,
    pub lines: Vec<OrderLineRequest>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmationEmailRequest {
    pub recipient: Option<String>,
    pub sender_label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Request parsing helpers
// -------------------------

pub fn parse_status(s: &str) -> Result<OrderStatus, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_status",
            format!(
                "status must be one of: {}",
                OrderStatus::ALL.map(|s| s.as_str()).join(", ")
            ),
        )
    })
}

pub fn parse_email(s: &str) -> Result<EmailAddress, axum::response::Response> {
    EmailAddress::parse(s).map_err(errors::domain_error_to_response)
}

impl ConfirmationEmailRequest {
    /// An empty body means "use the order's own email"; anything else must be valid JSON.
    pub fn from_body(body: &[u8]) -> Result<Self, axum::response::Response> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", format!("invalid JSON body: {e}"))
        })
    }
}

impl PlaceOrderRequest {
    pub fn into_new_order(self) -> Result<NewOrder, axum::response::Response> {
        let status = self.status.as_deref().map(parse_status).transpose()?;
        let email = self.customer.email.as_deref().map(parse_email).transpose()?;

        Ok(NewOrder {
            status,
            customer: CustomerInfo {
                name: self.customer.name,
                email,
                phone: self.customer.phone,
                address: self.customer.address,
            },
            lines: self
                .lines
                .into_iter()
                .map(|l| NewOrderLine {
                    product_name: l.product_name,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            note: self.note,
        })
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn order_to_json(order: &Order) -> serde_json::Value {
    let customer = order.customer();
    serde_json::json!({
        "id": order.id_typed().to_string(),
        "reference": order.reference().map(|r| r.to_string()),
        "status": order.status().as_str(),
        "customer": {
            "name": customer.name,
            "email": customer.email.as_ref().map(|e| e.to_string()),
            "phone": customer.phone,
            "address": customer.address,
        },
        "lines": order.lines().iter().map(|l| serde_json::json!({
            "line_no": l.line_no,
            "product_name": l.product_name,
            "quantity": l.quantity,
            "unit_price": l.unit_price,
            "subtotal": l.subtotal(),
        })).collect::<Vec<_>>(),
        "total": order.total(),
        "note": order.note(),
        "placed_at": order.placed_at().map(|d| d.to_rfc3339()),
        "updated_at": order.updated_at().map(|d| d.to_rfc3339()),
    })
}

pub fn job_to_json(job: &Job) -> serde_json::Value {
    serde_json::json!({
        "id": job.id.to_string(),
        "kind": job.kind.type_name(),
        "status": job.status.name(),
        "error": match &job.status {
            storefront_infra::jobs::JobStatus::Failed { error, .. }
            | storefront_infra::jobs::JobStatus::DeadLettered { error, .. } => Some(error.clone()),
            _ => None,
        },
        "attempt": job.attempt,
        "max_attempts": job.retry_policy.max_attempts,
        "scheduled_at": job.scheduled_at.map(|d| d.to_rfc3339()),
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
    })
}

pub fn dead_letter_to_json(entry: &DeadLetterEntry) -> serde_json::Value {
    serde_json::json!({
        "job": job_to_json(&entry.job),
        "reason": entry.reason,
        "dead_lettered_at": entry.dead_lettered_at.to_rfc3339(),
    })
}
