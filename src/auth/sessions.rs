//! Dual-token session lifecycle.
//!
//! A session moves Active -> AccessExpired -> (refresh) -> Active until the
//! refresh token expires or the session is ended, at which point the row is
//! gone. Refresh tokens are not rotated.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::errors::AuthError;
use crate::auth::repo_types::{NewSession, Session};
use crate::auth::store::SessionStore;
use crate::auth::token::{generate_token, hash_token, TokenPair};
use crate::clock::Clock;
use crate::config::SessionConfig;

/// Smallest gap kept between a refreshed access expiry and the refresh expiry.
const REFRESH_HEADROOM: Duration = Duration::seconds(1);

/// A newly created session and its plaintext tokens.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub tokens: TokenPair,
}

/// Result of minting a new access token from a refresh token.
pub struct RefreshedSession {
    pub session: Session,
    pub access_token: String,
}

impl std::fmt::Debug for RefreshedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedSession")
            .field("session", &self.session)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub async fn create_session(&self, user_id: Uuid) -> Result<IssuedSession, AuthError> {
        self.create_session_with_ttl(user_id, self.access_ttl, self.refresh_ttl)
            .await
    }

    #[instrument(skip(self))]
    pub async fn create_session_with_ttl(
        &self,
        user_id: Uuid,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<IssuedSession, AuthError> {
        if !access_ttl.is_positive() || access_ttl >= refresh_ttl {
            return Err(AuthError::Validation(
                "access ttl must be positive and shorter than refresh ttl".into(),
            ));
        }

        let now = self.clock.now();
        let tokens = TokenPair::generate();
        let session = self
            .store
            .insert(NewSession {
                user_id,
                access_token_hash: hash_token(&tokens.access_token),
                refresh_token_hash: hash_token(&tokens.refresh_token),
                access_expires_at: now + access_ttl,
                refresh_expires_at: now + refresh_ttl,
            })
            .await?;

        info!(user_id = %user_id, session_id = %session.id, "session created");
        Ok(IssuedSession { session, tokens })
    }

    pub async fn validate_access_token(&self, plaintext: &str) -> Result<Session, AuthError> {
        let session = self
            .store
            .find_by_access_hash(&hash_token(plaintext))
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        if session.access_expires_at <= self.clock.now() {
            debug!(session_id = %session.id, "access token expired");
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    pub async fn validate_refresh_token(&self, plaintext: &str) -> Result<Session, AuthError> {
        let session = self
            .store
            .find_by_refresh_hash(&hash_token(plaintext))
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        if session.refresh_expires_at <= self.clock.now() {
            debug!(session_id = %session.id, "refresh token expired");
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    #[instrument(skip_all)]
    pub async fn refresh_access_token(
        &self,
        refresh_plaintext: &str,
    ) -> Result<RefreshedSession, AuthError> {
        let current = self.validate_refresh_token(refresh_plaintext).await?;

        let now = self.clock.now();
        // Access must expire strictly before refresh.
        let latest = current.refresh_expires_at - REFRESH_HEADROOM;
        if latest <= now {
            debug!(session_id = %current.id, "refresh window too short for a new access token");
            return Err(AuthError::SessionExpired);
        }
        let access_token = generate_token();
        let access_expires_at = std::cmp::min(now + self.access_ttl, latest);

        let session = self
            .store
            .rotate_access(
                current.id,
                &current.refresh_token_hash,
                &hash_token(&access_token),
                access_expires_at,
                now,
            )
            .await?
            .ok_or_else(|| {
                warn!(session_id = %current.id, "session ended during refresh");
                AuthError::SessionInvalid
            })?;

        debug!(session_id = %session.id, user_id = %session.user_id, "access token refreshed");
        Ok(RefreshedSession {
            session,
            access_token,
        })
    }

    /// Ending a session that does not exist is not an error.
    pub async fn end_session_by_access_token(&self, plaintext: &str) -> Result<(), AuthError> {
        let deleted = self
            .store
            .delete_by_access_hash(&hash_token(plaintext))
            .await?;
        debug!(deleted, "session ended by access token");
        Ok(())
    }

    pub async fn end_session_by_refresh_token(&self, plaintext: &str) -> Result<(), AuthError> {
        let deleted = self
            .store
            .delete_by_refresh_hash(&hash_token(plaintext))
            .await?;
        debug!(deleted, "session ended by refresh token");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn end_all_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let deleted = self.store.delete_for_user(user_id).await?;
        info!(user_id = %user_id, deleted, "all user sessions ended");
        Ok(deleted)
    }

    /// Sweep entry point: drop sessions whose refresh token has expired.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let deleted = self.store.delete_expired(self.clock.now()).await?;
        if deleted > 0 {
            info!(deleted, "expired sessions purged");
        }
        Ok(deleted)
    }
}
