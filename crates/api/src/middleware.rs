use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use storefront_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolve the tenant from the `X-Tenant-Id` header.
pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let tenant_id = match extract_tenant(req.headers()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    next.run(req).await
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, Response> {
    let header = headers.get(TENANT_HEADER).ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "missing_tenant",
            "X-Tenant-Id header is required",
        )
    })?;

    header
        .to_str()
        .ok()
        .and_then(|raw| raw.parse::<TenantId>().ok())
        .ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                "invalid_tenant",
                "X-Tenant-Id must be a UUID",
            )
        })
}
