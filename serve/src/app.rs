//! Axum app: state and router.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use penguiflow::PenguiFlow;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) flow: Arc<PenguiFlow>,
}

/// Builds the router over a wired runtime.
pub fn router(flow: Arc<PenguiFlow>) -> Router {
    let state = AppState { flow };
    Router::new()
        .route("/run", post(super::run::run_query))
        .route("/resume", post(super::run::resume))
        .route("/artifact/:id", get(super::artifact::download))
        .route("/artifact/:id/meta", get(super::artifact::meta))
        .route("/steer", post(super::steer::steer))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
