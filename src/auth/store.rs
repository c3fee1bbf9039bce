//! Storage collaborators. Implementations hold no business logic: they are
//! keyed reads and single-statement writes.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::errors::StoreError;
use crate::auth::repo_types::{
    NewSession, NewUser, OAuthAccount, OAuthAccountUpsert, Session, User,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// `email` must already be normalised.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Fails with `StoreError::Conflict` when the email is taken.
    async fn create(&self, new_user: NewUser) -> StoreResult<User>;

    async fn set_email_verified(&self, id: Uuid) -> StoreResult<()>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait OAuthAccountStore: Send + Sync {
    async fn find(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<OAuthAccount>>;

    /// Atomic insert-or-update on `(provider_id, provider_user_id)`.
    ///
    /// On update only the token fields change; the returned row carries the
    /// original owner. Fails with `StoreError::Conflict` if the user already
    /// holds a different identity at the same provider.
    async fn upsert(&self, account: OAuthAccountUpsert) -> StoreResult<OAuthAccount>;

    /// Create `new_user` with id `account.user_id` and link `account` to it,
    /// atomically. If the identity is already linked nothing is created and
    /// the existing row is returned, so compare its `user_id`. Fails with
    /// `StoreError::Conflict` when the email is taken, again writing nothing.
    async fn create_user_with_account(
        &self,
        new_user: NewUser,
        account: OAuthAccountUpsert,
    ) -> StoreResult<OAuthAccount>;

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OAuthAccount>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, new_session: NewSession) -> StoreResult<Session>;

    async fn find_by_access_hash(&self, hash: &str) -> StoreResult<Option<Session>>;

    async fn find_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>>;

    /// Replace the access token of session `id` in one statement, only if
    /// the refresh token still matches and has not expired at `now`.
    /// Returns `None` when nothing was updated.
    async fn rotate_access(
        &self,
        id: Uuid,
        refresh_hash: &str,
        access_hash: &str,
        access_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Session>>;

    async fn delete_by_access_hash(&self, hash: &str) -> StoreResult<u64>;

    async fn delete_by_refresh_hash(&self, hash: &str) -> StoreResult<u64>;

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Delete sessions whose refresh token expired at or before `now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64>;
}
