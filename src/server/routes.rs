//! HTTP route handlers for the Aurora reply API.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use super::state::AppState;

/// Directory served for every path the API does not claim.
pub const STATIC_DIR: &str = "static";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat_reply))
        .fallback_service(ServeDir::new(STATIC_DIR))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "aurora-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Chat request.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Chat response.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// Generated reply text.
    pub reply: String,
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Failure detail.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Handle chat requests.
async fn chat_reply(
    State(state): State<Arc<AppState>>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) =
        request.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let prompt = request
        .prompt
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "prompt is required"))?;

    let generator = Arc::clone(&state.generator);
    let outcome = tokio::task::spawn_blocking(move || generator.generate(&prompt))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match outcome {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(error) => {
            tracing::error!(model = state.generator.model(), %error, "generation failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, error))
        }
    }
}
