//! HTTP API server for external control (storefront widget)
//!
//! This module provides a REST API for driving the voice assistant:
//! - POST /assistant/open - Open the panel and connect
//! - POST /assistant/close - Close the panel and disconnect
//! - POST /assistant/retry - Reconnect after an error
//! - GET /assistant/status - Current panel view and session statistics
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
