// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin `axum` HTTP façade wiring [`forge_orchestrator::OrchestratorService`]
//! into the routes described by the job orchestrator's external interface.
//! The core (`forge-orchestrator`, `forge-skills`, `forge-policy`, ...) does
//! not depend on this crate. It is kept deliberately thin.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod middleware;
mod routes;

pub use middleware::request_id_layer;

use axum::Router;
use forge_orchestrator::OrchestratorService;
use std::sync::Arc;

/// Everything the HTTP handlers need, shared behind an `Arc` and cloned per
/// request (axum's `State` extractor requires `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// The job lifecycle service.
    pub service: Arc<OrchestratorService>,
    /// Route prefix every handler is mounted under (e.g. `/api/v1`).
    pub api_prefix: String,
}

/// Builds the full router: health routes at the root, everything else under
/// `state.api_prefix`, with the `X-Request-Id` middleware layered over the
/// whole thing.
#[must_use]
pub fn build_app(state: AppState) -> Router {
    let prefix = state.api_prefix.clone();
    let api = Router::new()
        .route("/jobs", axum::routing::post(routes::create_job))
        .route("/jobs/{id}/start", axum::routing::post(routes::start_job))
        .route("/jobs/{id}", axum::routing::get(routes::get_job))
        .route("/jobs/{id}/events", axum::routing::get(routes::job_events))
        .route("/jobs/{id}/abort", axum::routing::post(routes::abort_job))
        .route("/jobs/{id}/artifacts", axum::routing::get(routes::list_artifacts))
        .route("/jobs/{id}/download", axum::routing::get(routes::download_bundle))
        .route(
            "/jobs/{id}/artifacts/{artifact_id}/download",
            axum::routing::get(routes::download_artifact),
        )
        .route("/skills", axum::routing::get(routes::list_skills))
        .route("/skills/{code}", axum::routing::get(routes::get_skill));

    Router::new()
        .route("/health", axum::routing::get(routes::health))
        .route("/healthz", axum::routing::get(routes::health))
        .nest(&prefix, api)
        .layer(request_id_layer())
        .with_state(state)
}
