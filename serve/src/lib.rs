//! HTTP surface for a wired [`PenguiFlow`] runtime.
//!
//! Endpoints:
//! - `POST /run` — accept a query, stream the trace as server-sent events.
//! - `POST /resume` — resume a paused run with the user's result.
//! - `GET /artifact/{id}` and `GET /artifact/{id}/meta` — scoped download;
//!   scope mismatches read as not-found.
//! - `POST /steer` — steering input for a running task.
//! - `GET /healthz` — liveness.

mod app;
mod artifact;
mod run;
mod steer;

use std::net::SocketAddr;
use std::sync::Arc;

use penguiflow::PenguiFlow;

pub use app::router;
pub use run::{ResumeRequest, RunRequest};

/// Initializes tracing from `RUST_LOG` (default `info`) and bootstraps the
/// process env from `.env`/XDG config.
pub fn init() {
    if let Err(e) = config::load_and_apply("penguiflow", None) {
        eprintln!("config bootstrap failed: {e}");
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Serves the runtime on `addr` until the process exits.
pub async fn serve(flow: Arc<PenguiFlow>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "penguiflow serve listening");
    axum::serve(listener, router(flow)).await
}
