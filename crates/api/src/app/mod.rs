//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, order placement, job executor and mail transport wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use storefront_infra::jobs::JobExecutorHandle;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// The router plus the background executor delivering queued emails.
pub struct App {
    pub router: Router,
    pub executor: JobExecutorHandle,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the tests).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<App> {
    let (services, executor) = services::build_services(config).await?;
    let services = Arc::new(services);

    // Tenant-scoped routes: require the tenant header.
    let scoped = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::tenant_middleware))
            .layer(Extension(services)),
    );

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped);

    Ok(App { router, executor })
}
