use super::state::AppState;
use crate::assistant::AssistantView;
use crate::error::VoiceError;
use crate::session::SessionStats;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub message: String,
    pub view: AssistantView,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub view: AssistantView,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub view: AssistantView,
}

fn status_code(err: &VoiceError) -> StatusCode {
    match err {
        VoiceError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        VoiceError::DeviceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        VoiceError::Handshake { .. } | VoiceError::Transport { .. } => StatusCode::BAD_GATEWAY,
        VoiceError::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        VoiceError::Cancelled => StatusCode::CONFLICT,
    }
}

fn connect_response(state: &AppState, result: crate::error::Result<()>, action: &str) -> Response {
    let view = state.assistant.view();

    match result {
        Ok(()) => {
            info!("Assistant {}: {}", action, view.status);
            (
                StatusCode::OK,
                Json(AssistantResponse {
                    message: format!("Assistant {}", action),
                    view,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to connect assistant: {}", e);
            (
                status_code(&e),
                Json(ErrorResponse {
                    error: format!("Failed to connect: {}", e),
                    view,
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /assistant/open
/// Open the panel and connect the voice session
pub async fn open_assistant(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.assistant.open().await;
    connect_response(&state, result, "opened")
}

/// POST /assistant/close
/// Close the panel and release the session
pub async fn close_assistant(State(state): State<AppState>) -> impl IntoResponse {
    state.assistant.close().await;

    (
        StatusCode::OK,
        Json(AssistantResponse {
            message: "Assistant closed".to_string(),
            view: state.assistant.view(),
        }),
    )
}

/// POST /assistant/retry
/// Reconnect after a failure
pub async fn retry_assistant(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.assistant.retry().await;
    connect_response(&state, result, "reconnected")
}

/// GET /assistant/status
/// Current panel view and session statistics
pub async fn get_assistant_status(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            view: state.assistant.view(),
            stats: state.assistant.stats().await,
        }),
    )
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
