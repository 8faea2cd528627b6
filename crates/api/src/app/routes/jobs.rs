use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

use storefront_infra::jobs::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

const DEFAULT_LIMIT: usize = 100;

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(job_stats))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:id", delete(discard_dead_letter))
        .route("/dead-letters/:id/retry", post(retry_dead_letter))
        .route("/:id", get(get_job))
}

fn parse_job_id(id: &str) -> Result<JobId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub async fn job_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.jobs.stats(tenant.tenant_id()) {
        Ok(queue) => Json(serde_json::json!({
            "queue": queue,
            "executor": services.executor_stats(),
        }))
        .into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

/// A live job, or the dead-lettered copy once it has given up.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.get(tenant.tenant_id(), job_id) {
        Ok(Some(job)) => return Json(dto::job_to_json(&job)).into_response(),
        Ok(None) => {}
        Err(e) => return errors::job_store_error_to_response(e),
    }

    match services.jobs.list_dead_letters(tenant.tenant_id(), usize::MAX) {
        Ok(entries) => match entries.iter().find(|e| e.job.id == job_id) {
            Some(entry) => Json(dto::job_to_json(&entry.job)).into_response(),
            None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        },
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    match services.jobs.list_dead_letters(tenant.tenant_id(), limit) {
        Ok(entries) => Json(entries.iter().map(dto::dead_letter_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn retry_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .jobs
        .retry_dead_letter(tenant.tenant_id(), job_id, services.clock.now())
    {
        Ok(job) => {
            tracing::info!(job_id = %job.id, "dead-lettered job requeued");
            Json(dto::job_to_json(&job)).into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}

/// Drop a dead letter for good.
pub async fn discard_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.delete_dead_letter(tenant.tenant_id(), job_id) {
        Ok(()) => {
            tracing::info!(job_id = %job_id, "dead-lettered job discarded");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}
