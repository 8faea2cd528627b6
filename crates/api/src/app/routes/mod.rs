use axum::Router;

pub mod jobs;
pub mod orders;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/jobs", jobs::router())
}
