use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use storefront_core::DomainError;
use storefront_infra::jobs::JobStoreError;
use storefront_infra::orders::{OrderStoreError, PlacementError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn placement_error_to_response(err: PlacementError) -> axum::response::Response {
    match err {
        PlacementError::Domain(e) => domain_error_to_response(e),
        PlacementError::Store(OrderStoreError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        PlacementError::Store(e) => {
            tracing::error!(error = %e, "order store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        e @ PlacementError::ReferenceConflict { .. } => {
            json_error(StatusCode::CONFLICT, "reference_conflict", e.to_string())
        }
    }
}

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        // Another tenant's job is reported as absent.
        JobStoreError::NotFound(_) | JobStoreError::TenantIsolation => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        JobStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}
