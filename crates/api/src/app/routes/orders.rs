use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use storefront_core::AggregateId;
use storefront_orders::OrderId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", post(change_order_status))
        .route("/:id/confirmation-email", post(send_confirmation_email))
}

fn parse_order_id(id: &str) -> Result<OrderId, axum::response::Response> {
    id.parse::<AggregateId>()
        .map(OrderId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"))
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::PlaceOrderRequest>,
) -> axum::response::Response {
    let new_order = match body.into_new_order() {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    match services.orders.place(tenant.tenant_id(), new_order).await {
        Ok(order) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": order.id_typed().to_string(),
                "reference": order.reference().map(|r| r.to_string()),
                "status": order.status().as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::placement_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.orders.list(tenant.tenant_id()).await {
        Ok(orders) => Json(orders.iter().map(dto::order_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::placement_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.get(tenant.tenant_id(), order_id).await {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::placement_error_to_response(e),
    }
}

pub async fn change_order_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeStatusRequest>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match dto::parse_status(&body.status) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services
        .orders
        .change_status(tenant.tenant_id(), order_id, status)
        .await
    {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::placement_error_to_response(e),
    }
}

/// Queue the confirmation email and return immediately with the job id.
pub async fn send_confirmation_email(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::ConfirmationEmailRequest::from_body(&body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let recipient = match body.recipient.as_deref().map(dto::parse_email).transpose() {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let order = match services.orders.get(tenant.tenant_id(), order_id).await {
        Ok(o) => o,
        Err(e) => return errors::placement_error_to_response(e),
    };

    match services.enqueue_confirmation(tenant.tenant_id(), &order, recipient, body.sender_label) {
        Some(Ok(job_id)) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"job_id": job_id.to_string()})),
        )
            .into_response(),
        Some(Err(e)) => errors::job_store_error_to_response(e),
        None => errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_recipient",
            "no recipient given and the order has no customer email",
        ),
    }
}
