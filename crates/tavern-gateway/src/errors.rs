use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tavern_errors::prelude::*;
use tavern_llm::prelude::LlmError;
use tavern_storage::prelude::StorageError;
use thiserror::Error;

/// One error type across the whole pipeline; every HTTP response that is
/// not a success is produced from this, in one place.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct GatewayError(pub Box<ErrorObj>);

impl GatewayError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn unauthenticated(detail: &str) -> Self {
        GatewayError(Box::new(
            ErrorBuilder::new(codes::AUTH_UNAUTHENTICATED)
                .user_msg("Authentication required.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn validation(detail: &str) -> Self {
        GatewayError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Invalid request.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn config_missing(detail: &str) -> Self {
        GatewayError(Box::new(
            ErrorBuilder::new(codes::CONFIG_MISSING)
                .user_msg("Service is not configured for this request.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        GatewayError(Box::new(
            ErrorBuilder::new(codes::BALANCE_INSUFFICIENT)
                .user_msg("Insufficient food balance.")
                .dev_msg(&format!("required {required}, available {available}"))
                .meta(json!({"required": required, "available": available}))
                .build(),
        ))
    }

    pub fn internal(detail: &str) -> Self {
        GatewayError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Request failed.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn code(&self) -> &'static str {
        self.0.code.code
    }
}

impl From<StorageError> for GatewayError {
    fn from(value: StorageError) -> Self {
        GatewayError(value.0)
    }
}

impl From<LlmError> for GatewayError {
    fn from(value: LlmError) -> Self {
        GatewayError(value.0)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let public = self.0.to_public();
        let body = Json(json!({
            "error": public.message,
            "code": public.code,
            "retry": public.retry,
        }));
        (status, body).into_response()
    }
}
