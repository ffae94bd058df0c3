//! applywatch Server
//!
//! Real-time monitoring relay for job-application autofill runs.
//! Dashboards watch over WebSocket; the browser extension signals over HTTP.

mod config;
mod driver;
mod http_ingress;
mod logging;
mod questions;
mod responses;
mod session;
mod state;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{DriverConfig, ServerArgs};
use crate::http_ingress::{progress_handler, start_agent_handler};
use crate::state::SessionRegistry;
use crate::websocket::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    let _logging = logging::init_logging()?;

    info!(
        component = "main",
        event = "server.starting",
        port = args.port,
        "Starting applywatch server"
    );

    let registry = Arc::new(SessionRegistry::new(DriverConfig::default()));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/start-agent", post(start_agent_handler))
        .route("/progress", post(progress_handler))
        .layer(TraceLayer::new_for_http())
        .layer(config::cors_layer()?)
        .with_state(registry);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    info!(
        component = "main",
        event = "server.listening",
        addr = %addr,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
