//! Species Server
//!
//! HTTP API classifying uploaded photographs into páramo species.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use crate::state::{AppState, ServerConfig, SharedState};

/// Build the application router
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        // Status
        .route("/", get(routes::health::status))
        .route("/test", get(routes::health::test))
        // Prediction
        .route("/predict", post(routes::predict::predict))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
