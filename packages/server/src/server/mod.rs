//! HTTP transport adapter: a thin axum router over the API facade.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::Api;

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<Api>,
}

pub fn router(api: Api) -> Router {
    Router::new()
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/:job_id", put(routes::put_job).get(routes::get_job))
        .route("/api/jobs/:job_id/pause", post(routes::pause_job))
        .route("/api/jobs/:job_id/retry", post(routes::retry_job))
        .route("/api/commitments", put(routes::request_work))
        .route(
            "/api/commitments/:commitment_id/heartbeat",
            post(routes::heartbeat),
        )
        .route("/api/commitments/:commitment_id", put(routes::complete_work))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { api: Arc::new(api) })
}
