//! Dashboard — Axum web server for the regulation margin panel.
//!
//! Serves a REST API and a self-contained HTML dashboard.
//! CORS enabled for local development.

pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    max_upload_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard address {addr}"))?;
    info!(%addr, "Dashboard server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Dashboard server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::PUT, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/report", get(routes::get_report))
        .route("/api/units/:id/load", put(routes::put_load))
        .route("/api/units/:id/regulation", put(routes::put_regulation))
        .route("/api/settings", put(routes::put_settings))
        .route("/api/extract", post(routes::post_extract))
        .route("/api/extract/raw", post(routes::post_extract_raw))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
