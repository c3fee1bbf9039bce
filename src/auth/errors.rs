use thiserror::Error;

/// Failures surfaced by the session and identity services.
///
/// Messages for the authentication variants are generic: the
/// same value is returned for an unknown email and a wrong password.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    AuthenticationFailed,

    #[error("session is invalid")]
    SessionInvalid,

    #[error("session expired")]
    SessionExpired,

    /// Provider detail is for logs only; never echo it to the client.
    #[error("oauth provider error: {0}")]
    Provider(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub(crate) fn provider(context: &str, err: impl std::fmt::Display) -> Self {
        AuthError::Provider(format!("{context}: {err}"))
    }
}

/// Errors returned by the storage traits.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Backend(err.into())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => AuthError::Conflict(what),
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}
