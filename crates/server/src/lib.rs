//! Tally development relay.
//!
//! The server side of the realtime protocol: WebSocket clients subscribe to
//! channels, and the HTTP API publishes notifications and channel messages
//! to them.

pub mod config;
pub mod error;
pub mod hub;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::RelayConfig;
pub use hub::Hub;
pub use state::AppState;

/// Build the relay's router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/notify", post(routes::notify::notify))
        .route(
            "/api/channels/{channel}/messages",
            post(routes::channels::publish),
        )
        .route("/api/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the relay on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, config: RelayConfig) -> std::io::Result<()> {
    axum::serve(listener, router(AppState::new(config))).await
}
