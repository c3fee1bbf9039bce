//! Google OAuth2 authorization code flow.

use async_trait::async_trait;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use super::{non_empty, send_json, OAuthProvider, ProviderId, ProviderProfile, ProviderToken};
use crate::auth::errors::AuthError;
use crate::config::ProviderCredentials;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPE: &str = "openid email profile";

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    name: Option<String>,
}

impl GoogleProvider {
    pub fn new(creds: &ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_endpoints(creds, http, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL)
    }

    pub fn with_endpoints(
        creds: &ProviderCredentials,
        http: reqwest::Client,
        auth_url: &str,
        token_url: &str,
        userinfo_url: &str,
    ) -> Self {
        Self {
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            userinfo_url: userinfo_url.to_string(),
            http,
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GOOGLE_SCOPE),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken, AuthError> {
        let issued_at = OffsetDateTime::now_utc();
        let res: TokenResponse = send_json(
            self.http.post(&self.token_url).form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ]),
            "google token exchange",
        )
        .await?;

        let access_token = non_empty(Some(res.access_token)).ok_or_else(|| {
            AuthError::Provider("google token exchange returned empty access_token".into())
        })?;

        let expires_at = match res.expires_in.filter(|secs| *secs > 0) {
            Some(secs) => Some(issued_at.checked_add(Duration::seconds(secs)).ok_or_else(|| {
                AuthError::Provider(format!("google token exchange: expires_in {secs} out of range"))
            })?),
            None => None,
        };

        Ok(ProviderToken {
            access_token,
            refresh_token: non_empty(res.refresh_token),
            expires_at,
        })
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, AuthError> {
        let info: GoogleUserInfo = send_json(
            self.http
                .get(&self.userinfo_url)
                .bearer_auth(&token.access_token),
            "google userinfo",
        )
        .await?;

        let email = non_empty(info.email).ok_or(AuthError::AuthenticationFailed)?;
        if info.sub.trim().is_empty() {
            return Err(AuthError::Provider("google userinfo missing sub".into()));
        }

        Ok(ProviderProfile {
            id: info.sub,
            email,
            name: non_empty(info.name),
            email_verified: info.email_verified,
        })
    }
}
