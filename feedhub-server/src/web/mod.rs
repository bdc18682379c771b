//! Web server: axum JSON API over the live feeds.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use feedhub_core::manager::FeedManager;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub manager: Arc<FeedManager>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/feeds", get(routes::api_feeds))
        .route("/api/feeds/:id/aircraft", get(routes::api_feed_aircraft))
        .with_state(state)
        .layer(cors)
}

/// Bind and serve until the process ends.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("feedhub listening on http://{addr}");
    axum::serve(listener, app).await
}
