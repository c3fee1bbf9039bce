//! Email + password credentials.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::errors::AuthError;
use crate::auth::password::{hash_password, verify_dummy, verify_password};
use crate::auth::repo_types::{NewUser, User};
use crate::auth::store::UserStore;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserStore>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Unknown email, wrong password and password-less accounts all yield
    /// the same `AuthenticationFailed`.
    #[instrument(skip(self, password))]
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);

        let user = match self.users.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                verify_dummy(password);
                warn!("login unknown email");
                return Err(AuthError::AuthenticationFailed);
            }
        };

        let Some(hash) = user.password_hash.as_deref() else {
            verify_dummy(password);
            warn!(user_id = %user.id, "password login on oauth-only account");
            return Err(AuthError::AuthenticationFailed);
        };

        let ok = verify_password(password, hash).map_err(|e| {
            error!(user_id = %user.id, error = %e, "stored password hash unreadable");
            AuthError::Internal(e)
        })?;

        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::AuthenticationFailed);
        }

        info!(user_id = %user.id, "credentials verified");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::Validation("invalid email".into()));
        }

        let name = match name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            n => n.to_string(),
        };

        let hash = hash_password(password)?;
        let user = self
            .users
            .create(NewUser {
                name,
                email,
                password_hash: Some(hash),
                email_verified: false,
            })
            .await
            .map_err(|e| match AuthError::from(e) {
                AuthError::Conflict(_) => AuthError::Conflict("email already registered".into()),
                other => other,
            })?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Checks `current` before storing the new hash. OAuth-only accounts may
    /// not use this to set a first password.
    #[instrument(skip(self, current, new))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AuthenticationFailed)?;

        let hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::AuthenticationFailed)?;
        if !verify_password(current, hash)? {
            warn!(user_id = %user_id, "password change with wrong current password");
            return Err(AuthError::AuthenticationFailed);
        }

        let new_hash = hash_password(new)?;
        self.users.set_password_hash(user_id, &new_hash).await?;
        info!(user_id = %user_id, "password changed");
        Ok(())
    }
}
