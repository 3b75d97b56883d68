use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use tracing::error;

use crate::auth;
use crate::errors::GatewayError;
use crate::metrics::metrics_middleware;
use crate::pipeline::{self, ChatTurnRequest, ChatTurnResponse};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat-processor", post(chat_processor).options(preflight))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(cors_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .with_state(state)
}

async fn chat_processor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatTurnRequest>,
) -> Result<Json<ChatTurnResponse>, GatewayError> {
    let user = auth::resolve_caller(&state, &headers, request.user_id.as_deref()).await?;
    match pipeline::run(&state, user, request).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!(code = err.code(), error = %err, "chat turn failed");
            Err(err)
        }
    }
}

// Browsers need the CORS headers on the real response too, not only on
// the preflight.
async fn cors_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    apply_cors(response.headers_mut());
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("authorization, content-type"),
    );
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot())
}
