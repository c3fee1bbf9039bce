//! Resolves an OAuth callback to exactly one local user.
//!
//! Lookup order: provider identity, then email, then a new user. The
//! account upsert is the serialisation point for concurrent callbacks: the
//! user named by the stored row is the one returned. A new user and its
//! account are written in one store operation, never separately.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::credentials::normalize_email;
use crate::auth::errors::{AuthError, StoreError};
use crate::auth::providers::{OAuthProvider, ProviderProfile, ProviderToken};
use crate::auth::repo_types::{NewUser, OAuthAccountUpsert, User};
use crate::auth::store::{OAuthAccountStore, UserStore};

pub struct IdentityResolver<P: OAuthProvider + ?Sized = dyn OAuthProvider> {
    provider: Arc<P>,
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn OAuthAccountStore>,
    require_verified_email_for_linking: bool,
}

impl<P: OAuthProvider + ?Sized> Clone for IdentityResolver<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            users: self.users.clone(),
            accounts: self.accounts.clone(),
            require_verified_email_for_linking: self.require_verified_email_for_linking,
        }
    }
}

impl<P: OAuthProvider + ?Sized> IdentityResolver<P> {
    pub fn new(
        provider: Arc<P>,
        users: Arc<dyn UserStore>,
        accounts: Arc<dyn OAuthAccountStore>,
    ) -> Self {
        Self {
            provider,
            users,
            accounts,
            require_verified_email_for_linking: false,
        }
    }

    pub fn require_verified_email_for_linking(mut self, required: bool) -> Self {
        self.require_verified_email_for_linking = required;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[instrument(skip_all, fields(provider = %self.provider.id()))]
    pub async fn authenticate(&self, code: &str, redirect_uri: &str) -> Result<User, AuthError> {
        let token = self
            .provider
            .exchange_code(code, redirect_uri)
            .await
            .map_err(log_provider_failure)?;
        let profile = self
            .provider
            .fetch_profile(&token)
            .await
            .map_err(log_provider_failure)?;

        let email = normalize_email(&profile.email);
        if email.is_empty() {
            warn!(provider_user_id = %profile.id, "provider returned no usable email");
            return Err(AuthError::AuthenticationFailed);
        }
        let asserted_verified = profile.email_verified == Some(true);

        let mut user = match self.returning_identity(&profile, &token).await? {
            Some(owner) => owner,
            None => match self.users.find_by_email(&email).await? {
                Some(existing) => {
                    self.link_existing(existing, &profile, asserted_verified, &token)
                        .await?
                }
                None => {
                    self.create_linked(&profile, &email, asserted_verified, &token)
                        .await?
                }
            },
        };

        if !user.email_verified && asserted_verified && user.email == email {
            match self.users.set_email_verified(user.id).await {
                Ok(()) => user.email_verified = true,
                Err(e) => warn!(user_id = %user.id, error = %e, "could not mark email verified"),
            }
        }

        info!(user_id = %user.id, provider_user_id = %profile.id, "oauth identity resolved");
        Ok(user)
    }

    /// Owner of an already linked identity, after refreshing its tokens.
    async fn returning_identity(
        &self,
        profile: &ProviderProfile,
        token: &ProviderToken,
    ) -> Result<Option<User>, AuthError> {
        let Some(account) = self
            .accounts
            .find(self.provider.id().as_str(), &profile.id)
            .await?
        else {
            return Ok(None);
        };
        let stored = self
            .accounts
            .upsert(self.account_upsert(account.user_id, profile, token))
            .await?;
        self.load_owner(stored.user_id).await.map(Some)
    }

    /// Link the identity to a user found by email, subject to the linking policy.
    async fn link_existing(
        &self,
        user: User,
        profile: &ProviderProfile,
        asserted_verified: bool,
        token: &ProviderToken,
    ) -> Result<User, AuthError> {
        if self.require_verified_email_for_linking && !asserted_verified {
            warn!(
                user_id = %user.id,
                provider_user_id = %profile.id,
                "refusing to link unverified provider email to existing account"
            );
            return Err(AuthError::Conflict(
                "an account with this email already exists".into(),
            ));
        }
        info!(user_id = %user.id, provider_user_id = %profile.id, "linking provider identity by email");

        let stored = self
            .accounts
            .upsert(self.account_upsert(user.id, profile, token))
            .await?;
        if stored.user_id == user.id {
            Ok(user)
        } else {
            // A concurrent callback linked this identity first; its owner wins.
            warn!(
                lost = %user.id,
                owner = %stored.user_id,
                "provider identity already linked by concurrent callback"
            );
            self.load_owner(stored.user_id).await
        }
    }

    /// New user plus its first account, written atomically by the store.
    async fn create_linked(
        &self,
        profile: &ProviderProfile,
        email: &str,
        asserted_verified: bool,
        token: &ProviderToken,
    ) -> Result<User, AuthError> {
        let name = profile
            .name
            .clone()
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let user_id = Uuid::new_v4();

        let created = self
            .accounts
            .create_user_with_account(
                NewUser {
                    name,
                    email: email.to_string(),
                    password_hash: None,
                    email_verified: asserted_verified,
                },
                self.account_upsert(user_id, profile, token),
            )
            .await;

        match created {
            Ok(stored) if stored.user_id == user_id => {
                info!(user_id = %user_id, "user created from provider identity");
                self.load_owner(user_id).await
            }
            Ok(stored) => {
                warn!(owner = %stored.user_id, "provider identity already linked by concurrent callback");
                self.load_owner(stored.user_id).await
            }
            Err(StoreError::Conflict(_)) => {
                // The email was taken between our lookup and insert.
                if let Some(owner) = self.returning_identity(profile, token).await? {
                    return Ok(owner);
                }
                let existing = self.users.find_by_email(email).await?.ok_or_else(|| {
                    AuthError::Internal(anyhow!("user vanished after email conflict"))
                })?;
                self.link_existing(existing, profile, asserted_verified, token)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_owner(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users.find_by_id(user_id).await?.ok_or_else(|| {
            error!(user_id = %user_id, "oauth account owner missing");
            AuthError::Internal(anyhow!("oauth account owner {user_id} missing"))
        })
    }

    fn account_upsert(
        &self,
        user_id: Uuid,
        profile: &ProviderProfile,
        token: &ProviderToken,
    ) -> OAuthAccountUpsert {
        OAuthAccountUpsert {
            provider_id: self.provider.id().as_str().to_string(),
            provider_user_id: profile.id.clone(),
            user_id,
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at,
        }
    }
}

fn log_provider_failure(err: AuthError) -> AuthError {
    if let AuthError::Provider(detail) = &err {
        error!(detail = %detail, "oauth provider call failed");
    }
    err
}
