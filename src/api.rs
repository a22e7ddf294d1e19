//! HTTP surface for the zinger function.
//!
//! Mirrors the hosted function route so the web client can call either.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::smack::{SmackError, SmackGenerator, SmackRequest};

pub const GENERATE_SMACK_PATH: &str = "/functions/v1/generate-smack";

/// Shared state for HTTP handlers
pub struct AppState {
    pub smack: SmackGenerator,
}

impl AppState {
    pub fn new(smack: SmackGenerator) -> Self {
        Self { smack }
    }
}

/// Build the router with CORS and request tracing
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(GENERATE_SMACK_PATH, post(generate_smack))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Generate a zinger for the side the user voted for.
///
/// POST /functions/v1/generate-smack
///
/// Always answers 200 with a zinger once the payload is valid; model failures
/// fall back to a category example.
pub async fn generate_smack(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SmackRequest>,
) -> Response {
    match state.smack.generate(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(SmackError::MissingField(field)) => {
            tracing::debug!("Rejecting zinger request, missing {}", field);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Missing required fields" })),
            )
                .into_response()
        }
    }
}
