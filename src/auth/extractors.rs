use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

use super::cookies::{read_cookie, ACCESS_COOKIE};
use super::errors::AuthError;
use crate::state::AppState;

/// Caller authenticated by a live access token.
pub struct AuthUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Cookie first, then "Bearer <token>"
        let token = read_cookie(&parts.headers, ACCESS_COOKIE)
            .or_else(|| {
                parts
                    .headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
                    .map(|t| t.trim().to_string())
            })
            .ok_or((StatusCode::UNAUTHORIZED, "missing access token".into()))?;

        let session = state
            .sessions
            .validate_access_token(&token)
            .await
            .map_err(|e| match e {
                AuthError::SessionExpired => (StatusCode::UNAUTHORIZED, "session expired".into()),
                AuthError::SessionInvalid => (StatusCode::UNAUTHORIZED, "invalid session".into()),
                other => super::handlers::reject(other),
            })?;

        Ok(AuthUser {
            user_id: session.user_id,
            session_id: session.id,
        })
    }
}
