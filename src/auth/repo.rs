use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{
    NewSession, NewUser, OAuthAccount, OAuthAccountUpsert, Session, User,
};
use crate::auth::store::{OAuthAccountStore, SessionStore, StoreResult, UserStore};

const USER_COLUMNS: &str =
    "id, name, email, password_hash, email_verified, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, access_token_hash, refresh_token_hash, \
     access_expires_at, refresh_expires_at, created_at";
const ACCOUNT_COLUMNS: &str = "provider_id, provider_user_id, user_id, access_token, \
     refresh_token, expires_at, created_at, updated_at";

/// Postgres implementation of the storage traits over the shared pool.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Insert-or-update on `(provider_id, provider_user_id)`. `user_id` is never
/// updated: the first link owns the identity.
async fn upsert_account<'e, E: PgExecutor<'e>>(
    executor: E,
    account: &OAuthAccountUpsert,
) -> Result<OAuthAccount, sqlx::Error> {
    sqlx::query_as::<_, OAuthAccount>(&format!(
        r#"
        INSERT INTO oauth_accounts
            (provider_id, provider_user_id, user_id, access_token, refresh_token, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (provider_id, provider_user_id) DO UPDATE
        SET access_token = EXCLUDED.access_token,
            refresh_token = COALESCE(EXCLUDED.refresh_token, oauth_accounts.refresh_token),
            expires_at = EXCLUDED.expires_at,
            updated_at = now()
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(&account.provider_id)
    .bind(&account.provider_user_id)
    .bind(account.user_id)
    .bind(&account.access_token)
    .bind(&account.refresh_token)
    .bind(account.expires_at)
    .fetch_one(executor)
    .await
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, email_verified)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.email_verified)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_email_verified(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(anyhow::anyhow!("user {id} not found").into());
        }
        Ok(())
    }
}

#[async_trait]
impl OAuthAccountStore for PgStore {
    async fn find(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<OAuthAccount>> {
        let account = sqlx::query_as::<_, OAuthAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM oauth_accounts \
             WHERE provider_id = $1 AND provider_user_id = $2"
        ))
        .bind(provider_id)
        .bind(provider_user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn upsert(&self, account: OAuthAccountUpsert) -> StoreResult<OAuthAccount> {
        Ok(upsert_account(&self.db, &account).await?)
    }

    async fn create_user_with_account(
        &self,
        new_user: NewUser,
        account: OAuthAccountUpsert,
    ) -> StoreResult<OAuthAccount> {
        // Dropping `tx` before commit rolls everything back.
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, email_verified)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.user_id)
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.email_verified)
        .execute(&mut *tx)
        .await?;

        let stored = upsert_account(&mut *tx, &account).await?;
        if stored.user_id != account.user_id {
            // Linked by someone else meanwhile; keep nothing from this attempt.
            tx.rollback().await?;
            return Ok(stored);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OAuthAccount>> {
        let rows = sqlx::query_as::<_, OAuthAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM oauth_accounts WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert(&self, new_session: NewSession) -> StoreResult<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions
                (id, user_id, access_token_hash, refresh_token_hash,
                 access_expires_at, refresh_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_session.user_id)
        .bind(&new_session.access_token_hash)
        .bind(&new_session.refresh_token_hash)
        .bind(new_session.access_expires_at)
        .bind(new_session.refresh_expires_at)
        .fetch_one(&self.db)
        .await?;
        Ok(session)
    }

    async fn find_by_access_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE access_token_hash = $1"
        ))
        .bind(hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn find_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1"
        ))
        .bind(hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn rotate_access(
        &self,
        id: Uuid,
        refresh_hash: &str,
        access_hash: &str,
        access_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET access_token_hash = $3, access_expires_at = $4
            WHERE id = $1 AND refresh_token_hash = $2 AND refresh_expires_at > $5
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(refresh_hash)
        .bind(access_hash)
        .bind(access_expires_at)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete_by_access_hash(&self, hash: &str) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE access_token_hash = $1")
            .bind(hash)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_by_refresh_hash(&self, hash: &str) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE refresh_token_hash = $1")
            .bind(hash)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE refresh_expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await
            .context("delete expired sessions")?;
        Ok(res.rows_affected())
    }
}
