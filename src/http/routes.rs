use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Assistant lifecycle
        .route("/assistant/open", post(handlers::open_assistant))
        .route("/assistant/close", post(handlers::close_assistant))
        .route("/assistant/retry", post(handlers::retry_assistant))
        .route("/assistant/status", get(handlers::get_assistant_status))
        // The widget is served from the storefront origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
