//! HTTP surface — Axum JSON API over the cashout service.
//!
//! CORS enabled for local development.

pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Start the API server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind API port");

        axum::serve(listener, app).await.expect("API server error");
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/cashouts", post(routes::create_cashout))
        .route("/api/cashouts", get(routes::list_cashouts))
        .route("/api/cashouts/:id", get(routes::get_cashout))
        .route("/api/cashouts/:id/cancel", post(routes::cancel_cashout))
        .route("/api/cashouts/:id/resolve", post(routes::resolve_cashout))
        .route("/api/cashouts/:id/reverse", post(routes::reverse_cashout))
        .route("/api/quote", get(routes::get_quote))
        .route("/api/methods", get(routes::get_methods))
        .route("/api/channels", get(routes::get_channels))
        .route("/api/accounts", post(routes::add_account))
        .route("/api/accounts", get(routes::list_accounts))
        .route("/api/accounts/:id", delete(routes::remove_account))
        .route("/api/tier", post(routes::set_tier))
        .route("/api/profile", get(routes::get_profile))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
