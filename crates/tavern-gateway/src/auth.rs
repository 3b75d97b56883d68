use axum::http::HeaderMap;
use tavern_types::prelude::UserId;
use tracing::debug;

use crate::errors::GatewayError;
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| GatewayError::unauthenticated("missing authorization header"))?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::unauthenticated("authorization header is not valid text"))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| GatewayError::unauthenticated("authorization header is not a bearer token"))
}

/// Two modes: the bearer is either an end-user session token verified
/// against the store, or the privileged service secret, in which case the
/// body-supplied user id is trusted verbatim.
pub async fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
    body_user_id: Option<&str>,
) -> Result<UserId, GatewayError> {
    let token = bearer_token(headers)?;

    if let Some(secret) = state.service_secret.as_deref() {
        if token == secret {
            let user_id = body_user_id.filter(|id| !id.is_empty()).ok_or_else(|| {
                GatewayError::validation("userId is required for service-role calls")
            })?;
            debug!(user = %user_id, "service-role call");
            return Ok(UserId(user_id.to_string()));
        }
    }

    state
        .store
        .user_for_session(token)
        .await?
        .ok_or_else(|| GatewayError::unauthenticated("session token did not resolve to a user"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok-123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "tok-123");
    }

    #[test]
    fn missing_or_malformed_header_is_unauthenticated() {
        let headers = HeaderMap::new();
        assert_eq!(
            bearer_token(&headers).unwrap_err().code(),
            "AUTH.UNAUTHENTICATED"
        );

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }
}
