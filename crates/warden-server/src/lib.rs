//! Warden control plane — the single-listener HTTP/JSON surface over
//! lists, clients and the lookup probe.
//!
//! The router lives in [`api`]; this module wires the middleware
//! (request logging, the 30-second wall-clock timeout) and the listener
//! with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use warden_filter::{FilterEngine, FilterError};

pub mod api;

pub use api::{api_router, AppState};

use api::ErrorResponse;

/// Requests running longer than this are answered with 408.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the full application: `/api` routes plus middleware.
pub fn app(engine: Arc<FilterEngine>) -> Router {
    Router::new()
        .nest("/api", api::api_router())
        .layer(middleware::from_fn(timeout_requests))
        .layer(middleware::from_fn(log_requests))
        .with_state(AppState { engine })
}

async fn log_requests(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    info!("{} {} from {}", request.method(), request.uri().path(), remote);
    next.run(request).await
}

/// The handler may already be past its commit point when the timeout
/// fires; in-memory state is still swapped atomically.
async fn timeout_requests(request: Request, next: Next) -> Response {
    match tokio::time::timeout(REQUEST_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ErrorResponse {
                error: FilterError::Timeout.to_string(),
            }),
        )
            .into_response(),
    }
}

/// The control-plane server.
pub struct ApiServer {
    engine: Arc<FilterEngine>,
    port: u16,
}

impl ApiServer {
    pub fn new(engine: Arc<FilterEngine>, port: u16) -> Self {
        ApiServer { engine, port }
    }

    /// Serve until the shutdown channel fires, then drain gracefully.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> anyhow::Result<()> {
        let app = app(self.engine);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind API port {}", self.port))?;

        info!(
            "control plane listening on http://{}",
            listener.local_addr().context("failed to get local address")?
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .context("API server error")?;

        info!("control plane stopped");
        Ok(())
    }
}
