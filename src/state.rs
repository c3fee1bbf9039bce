use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::credentials::CredentialStore;
use crate::auth::identity::IdentityResolver;
use crate::auth::providers::{
    http_client, GithubProvider, GoogleProvider, OAuthProvider, ProviderId,
};
use crate::auth::repo::PgStore;
use crate::auth::sessions::SessionManager;
use crate::auth::store::{OAuthAccountStore, SessionStore, UserStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, OAuthConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn OAuthAccountStore>,
    pub credentials: CredentialStore,
    pub sessions: SessionManager,
    pub identities: Arc<HashMap<ProviderId, IdentityResolver>>,
}

impl AppState {
    pub fn init(config: AppConfig, db: sqlx::PgPool) -> anyhow::Result<Self> {
        let providers = providers_from_config(&config.oauth)?;
        let store = Arc::new(PgStore::new(db));
        Ok(Self::from_parts(config, store, Arc::new(SystemClock), providers))
    }

    /// Wire every component against one store.
    pub fn from_parts<S>(
        config: AppConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        providers: Vec<Arc<dyn OAuthProvider>>,
    ) -> Self
    where
        S: UserStore + OAuthAccountStore + SessionStore + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let accounts: Arc<dyn OAuthAccountStore> = store.clone();
        let sessions: Arc<dyn SessionStore> = store;

        let strict_linking = config.oauth.require_verified_email_for_linking;
        let identities: HashMap<ProviderId, IdentityResolver> = providers
            .into_iter()
            .map(|provider| {
                let id = provider.id();
                let resolver = IdentityResolver::new(provider, users.clone(), accounts.clone())
                    .require_verified_email_for_linking(strict_linking);
                (id, resolver)
            })
            .collect();

        Self {
            credentials: CredentialStore::new(users.clone()),
            sessions: SessionManager::new(sessions, &config.session, clock),
            identities: Arc::new(identities),
            config: Arc::new(config),
            users,
            accounts,
        }
    }
}

/// One provider per configured client id/secret pair.
pub fn providers_from_config(cfg: &OAuthConfig) -> anyhow::Result<Vec<Arc<dyn OAuthProvider>>> {
    let http = http_client(Duration::from_secs(cfg.http_timeout_secs))?;
    let mut providers: Vec<Arc<dyn OAuthProvider>> = Vec::new();
    if let Some(creds) = &cfg.github {
        providers.push(Arc::new(GithubProvider::new(creds, http.clone())));
    }
    if let Some(creds) = &cfg.google {
        providers.push(Arc::new(GoogleProvider::new(creds, http.clone())));
    }
    for p in &providers {
        tracing::info!(provider = %p.id(), "oauth provider enabled");
    }
    Ok(providers)
}
