mod export;
mod middleware;
mod public;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{export::ExportService, render::PreviewRenderer};

use middleware::{log_responses, set_request_context};

/// Shared handles for every route.
#[derive(Clone)]
pub struct HttpState {
    pub exports: Arc<ExportService>,
    pub preview: Arc<PreviewRenderer>,
    /// Deadline for one `POST /preview`; expiry answers 504.
    pub preview_timeout: Duration,
}

/// Build the public router. `body_limit` caps every request body in bytes.
pub fn build_router(state: HttpState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(public::index))
        .route("/preview", post(public::preview))
        .route("/export", post(export::export_document))
        .route("/_health", get(public::health))
        .route("/static/highlight.css", get(public::highlight_css))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
