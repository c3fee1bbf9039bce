//! OAuth provider capability. The identity resolver only talks to this
//! trait, so a new provider is a new implementation and nothing else.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::auth::errors::AuthError;

pub mod github;
pub mod google;

pub use github::GithubProvider;
pub use google::GoogleProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Github,
    Google,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Github => "github",
            ProviderId::Google => "google",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderId::Github),
            "google" => Ok(ProviderId::Google),
            other => Err(AuthError::Validation(format!("unknown provider '{other}'"))),
        }
    }
}

/// Token obtained from the provider's token endpoint.
#[derive(Clone)]
pub struct ProviderToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Normalised identity returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    /// `None` when the provider did not say.
    pub email_verified: Option<bool>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken, AuthError>;

    /// Must return a non-empty email or fail.
    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, AuthError>;
}

/// Client shared by the providers: explicit timeout, no retries.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tripkeeper/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Send a request and decode a JSON body, mapping every failure to
/// `AuthError::Provider` with `context`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
    context: &str,
) -> Result<T, AuthError> {
    let res = req
        .send()
        .await
        .map_err(|e| AuthError::provider(context, e))?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_else(|_| "no body".to_string());
        return Err(AuthError::Provider(format!("{context} failed ({status}): {body}")));
    }

    res.json::<T>()
        .await
        .map_err(|e| AuthError::provider(context, format!("malformed response: {e}")))
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
