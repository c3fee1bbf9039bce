//! In-memory storage used by the unit tests. Enforces the same unique keys
//! as the Postgres schema; every method runs under one mutex so upserts are
//! atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::errors::StoreError;
use crate::auth::repo_types::{
    NewSession, NewUser, OAuthAccount, OAuthAccountUpsert, Session, User,
};
use crate::auth::store::{OAuthAccountStore, SessionStore, StoreResult, UserStore};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    accounts: HashMap<(String, String), OAuthAccount>,
    sessions: HashMap<Uuid, Session>,
}

impl Inner {
    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email.eq_ignore_ascii_case(email))
    }

    fn insert_user(&mut self, id: Uuid, new_user: NewUser) -> StoreResult<User> {
        if self.email_taken(&new_user.email) {
            return Err(StoreError::Conflict("users_email_key".into()));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id,
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            email_verified: new_user.email_verified,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    fn insert_account(&mut self, account: OAuthAccountUpsert) -> OAuthAccount {
        let now = OffsetDateTime::now_utc();
        let stored = OAuthAccount {
            provider_id: account.provider_id,
            provider_user_id: account.provider_user_id,
            user_id: account.user_id,
            access_token: account.access_token,
            refresh_token: account.refresh_token,
            expires_at: account.expires_at,
            created_at: now,
            updated_at: now,
        };
        let key = (stored.provider_id.clone(), stored.provider_user_id.clone());
        self.accounts.insert(key, stored.clone());
        stored
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    pub async fn account_count(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> StoreResult<User> {
        self.inner.lock().await.insert_user(Uuid::new_v4(), new_user)
    }

    async fn set_email_verified(&self, id: Uuid) -> StoreResult<()> {
        if let Some(user) = self.inner.lock().await.users.get_mut(&id) {
            user.email_verified = true;
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        user.password_hash = Some(password_hash.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl OAuthAccountStore for MemoryStore {
    async fn find(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<OAuthAccount>> {
        let key = (provider_id.to_string(), provider_user_id.to_string());
        Ok(self.inner.lock().await.accounts.get(&key).cloned())
    }

    async fn upsert(&self, account: OAuthAccountUpsert) -> StoreResult<OAuthAccount> {
        let mut inner = self.inner.lock().await;
        let key = (account.provider_id.clone(), account.provider_user_id.clone());

        if let Some(existing) = inner.accounts.get_mut(&key) {
            existing.access_token = account.access_token;
            if account.refresh_token.is_some() {
                existing.refresh_token = account.refresh_token;
            }
            existing.expires_at = account.expires_at;
            existing.updated_at = OffsetDateTime::now_utc();
            return Ok(existing.clone());
        }

        if inner
            .accounts
            .values()
            .any(|a| a.user_id == account.user_id && a.provider_id == account.provider_id)
        {
            return Err(StoreError::Conflict("oauth_accounts_user_provider_key".into()));
        }

        Ok(inner.insert_account(account))
    }

    async fn create_user_with_account(
        &self,
        new_user: NewUser,
        account: OAuthAccountUpsert,
    ) -> StoreResult<OAuthAccount> {
        let mut inner = self.inner.lock().await;
        // Same order as the Postgres transaction: user insert, then account.
        if inner.email_taken(&new_user.email) {
            return Err(StoreError::Conflict("users_email_key".into()));
        }
        let key = (account.provider_id.clone(), account.provider_user_id.clone());
        if let Some(existing) = inner.accounts.get(&key) {
            return Ok(existing.clone());
        }
        inner.insert_user(account.user_id, new_user)?;
        Ok(inner.insert_account(account))
    }

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OAuthAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, new_session: NewSession) -> StoreResult<Session> {
        let mut inner = self.inner.lock().await;
        let taken = inner.sessions.values().any(|s| {
            s.access_token_hash == new_session.access_token_hash
                || s.refresh_token_hash == new_session.refresh_token_hash
        });
        if taken {
            return Err(StoreError::Conflict("sessions_token_hash_key".into()));
        }
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            access_token_hash: new_session.access_token_hash,
            refresh_token_hash: new_session.refresh_token_hash,
            access_expires_at: new_session.access_expires_at,
            refresh_expires_at: new_session.refresh_expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_access_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.access_token_hash == hash)
            .cloned())
    }

    async fn find_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == hash)
            .cloned())
    }

    async fn rotate_access(
        &self,
        id: Uuid,
        refresh_hash: &str,
        access_hash: &str,
        access_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Session>> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(s) if s.refresh_token_hash == refresh_hash && s.refresh_expires_at > now => {
                s.access_token_hash = access_hash.to_string();
                s.access_expires_at = access_expires_at;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_by_access_hash(&self, hash: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.access_token_hash != hash);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn delete_by_refresh_hash(&self, hash: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.refresh_token_hash != hash);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.refresh_expires_at > now);
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Octo".into(),
            email: email.into(),
            password_hash: None,
            email_verified: false,
        }
    }

    fn link(subject: &str, user_id: Uuid) -> OAuthAccountUpsert {
        OAuthAccountUpsert {
            provider_id: "github".into(),
            provider_user_id: subject.into(),
            user_id,
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_user_with_account_writes_both() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let stored = store
            .create_user_with_account(new_user("a@x.com"), link("1", id))
            .await
            .unwrap();

        assert_eq!(stored.user_id, id);
        assert_eq!(store.find_by_id(id).await.unwrap().unwrap().email, "a@x.com");
        assert_eq!(store.account_count().await, 1);
    }

    #[tokio::test]
    async fn taken_email_writes_nothing() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com")).await.unwrap();

        let err = store
            .create_user_with_account(new_user("A@x.com"), link("1", Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.account_count().await, 0);
    }

    #[tokio::test]
    async fn linked_identity_returns_owner_without_new_user() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store
            .create_user_with_account(new_user("a@x.com"), link("1", owner))
            .await
            .unwrap();

        let stored = store
            .create_user_with_account(new_user("b@x.com"), link("1", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(stored.user_id, owner);
        assert_eq!(store.user_count().await, 1);
        assert!(store.find_by_email("b@x.com").await.unwrap().is_none());
    }
}
