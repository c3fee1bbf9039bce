//! GitHub OAuth app flow.
//!
//! GitHub hides the email on `/user` when the user keeps it private; in
//! that case `/user/emails` is consulted (needs the `user:email` scope).

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use super::{non_empty, send_json, OAuthProvider, ProviderId, ProviderProfile, ProviderToken};
use crate::auth::errors::AuthError;
use crate::config::ProviderCredentials;

const GITHUB_WEB_URL: &str = "https://github.com";
const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_SCOPE: &str = "read:user user:email";

pub struct GithubProvider {
    client_id: String,
    client_secret: String,
    web_url: String,
    api_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GithubProvider {
    pub fn new(creds: &ProviderCredentials, http: reqwest::Client) -> Self {
        Self::with_base_urls(creds, http, GITHUB_WEB_URL, GITHUB_API_URL)
    }

    pub fn with_base_urls(
        creds: &ProviderCredentials,
        http: reqwest::Client,
        web_url: &str,
        api_url: &str,
    ) -> Self {
        Self {
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
            web_url: web_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn primary_email(&self, token: &str) -> Result<Option<GithubEmail>, AuthError> {
        let emails: Vec<GithubEmail> = send_json(
            self.http
                .get(format!("{}/user/emails", self.api_url))
                .bearer_auth(token)
                .header(ACCEPT, "application/vnd.github+json"),
            "github email listing",
        )
        .await?;
        Ok(pick_email(emails))
    }
}

/// Primary+verified first, then any verified, then whatever is listed first.
fn pick_email(emails: Vec<GithubEmail>) -> Option<GithubEmail> {
    let usable: Vec<GithubEmail> = emails
        .into_iter()
        .filter(|e| !e.email.trim().is_empty())
        .collect();
    usable
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| usable.iter().find(|e| e.verified))
        .or_else(|| usable.first())
        .cloned()
}

#[async_trait]
impl OAuthProvider for GithubProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Github
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            self.web_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GITHUB_SCOPE),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<ProviderToken, AuthError> {
        let res: TokenResponse = send_json(
            self.http
                .post(format!("{}/login/oauth/access_token", self.web_url))
                .header(ACCEPT, "application/json")
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                ]),
            "github token exchange",
        )
        .await?;

        // GitHub reports a bad code with 200 and an `error` field.
        if let Some(error) = res.error {
            let detail = res.error_description.unwrap_or_default();
            return Err(AuthError::Provider(format!(
                "github token exchange rejected: {error} {detail}"
            )));
        }
        let access_token = non_empty(res.access_token).ok_or_else(|| {
            AuthError::Provider("github token exchange returned no access_token".into())
        })?;

        Ok(ProviderToken {
            access_token,
            refresh_token: None,
            expires_at: None,
        })
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, AuthError> {
        let user: GithubUser = send_json(
            self.http
                .get(format!("{}/user", self.api_url))
                .bearer_auth(&token.access_token)
                .header(ACCEPT, "application/vnd.github+json"),
            "github profile",
        )
        .await?;

        let (email, email_verified) = match non_empty(user.email) {
            Some(email) => (Some(email), None),
            None => {
                debug!(github_id = user.id, "github email private, listing emails");
                match self.primary_email(&token.access_token).await? {
                    Some(e) => (non_empty(Some(e.email)), Some(e.verified)),
                    None => (None, None),
                }
            }
        };
        let email = email.ok_or(AuthError::AuthenticationFailed)?;

        Ok(ProviderProfile {
            id: user.id.to_string(),
            email,
            name: non_empty(user.name).or(Some(user.login)),
            email_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "gh-client".into(),
            client_secret: "gh-secret".into(),
        }
    }

    fn provider(server: &MockServer) -> GithubProvider {
        let http = crate::auth::providers::http_client(Duration::from_secs(2)).unwrap();
        GithubProvider::with_base_urls(&creds(), http, &server.uri(), &server.uri())
    }

    fn token(value: &str) -> ProviderToken {
        ProviderToken {
            access_token: value.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    fn email(email: &str, primary: bool, verified: bool) -> GithubEmail {
        GithubEmail {
            email: email.into(),
            primary,
            verified,
        }
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let http = reqwest::Client::new();
        let p = GithubProvider::new(&creds(), http);
        let url = p.authorization_url("http://localhost:8080/cb", "st4te");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=gh-client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcb"));
        assert!(url.contains("scope=read%3Auser%20user%3Aemail"));
        assert!(url.contains("state=st4te"));
    }

    #[test]
    fn pick_email_prefers_primary_verified() {
        let picked = pick_email(vec![
            email("old@x.com", false, true),
            email("main@x.com", true, true),
        ])
        .unwrap();
        assert_eq!(picked.email, "main@x.com");

        let picked = pick_email(vec![
            email("unverified@x.com", true, false),
            email("verified@x.com", false, true),
        ])
        .unwrap();
        assert_eq!(picked.email, "verified@x.com");

        let picked = pick_email(vec![email("only@x.com", false, false)]).unwrap();
        assert_eq!(picked.email, "only@x.com");
        assert!(!picked.verified);

        assert!(pick_email(vec![email("  ", true, true)]).is_none());
        assert!(pick_email(vec![]).is_none());
    }

    #[tokio::test]
    async fn exchange_code_returns_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_secret=gh-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_123",
                "token_type": "bearer",
                "scope": "read:user,user:email"
            })))
            .mount(&server)
            .await;

        let t = provider(&server)
            .exchange_code("abc", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(t.access_token, "gho_123");
        assert!(t.refresh_token.is_none());
        assert!(t.expires_at.is_none());
    }

    #[tokio::test]
    async fn exchange_code_error_body_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .exchange_code("stale", "http://localhost/cb")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider(ref m) if m.contains("bad_verification_code")));
    }

    #[tokio::test]
    async fn profile_with_public_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42,
                "login": "octocat",
                "name": "The Octocat",
                "email": "octo@github.com"
            })))
            .mount(&server)
            .await;

        let profile = provider(&server).fetch_profile(&token("gho_123")).await.unwrap();
        assert_eq!(profile.id, "42");
        assert_eq!(profile.email, "octo@github.com");
        assert_eq!(profile.name.as_deref(), Some("The Octocat"));
        assert_eq!(profile.email_verified, None);
    }

    #[tokio::test]
    async fn private_email_falls_back_to_email_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 7,
                "login": "shy",
                "name": null,
                "email": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "email": "noreply@users.github.com", "primary": false, "verified": true },
                { "email": "shy@x.com", "primary": true, "verified": true }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let profile = provider(&server).fetch_profile(&token("t")).await.unwrap();
        assert_eq!(profile.email, "shy@x.com");
        assert_eq!(profile.email_verified, Some(true));
        assert_eq!(profile.name.as_deref(), Some("shy"));
    }

    #[tokio::test]
    async fn no_email_anywhere_fails_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 8, "login": "ghost", "name": null, "email": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = provider(&server).fetch_profile(&token("t")).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn upstream_failure_and_malformed_body_are_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let err = provider(&server).fetch_profile(&token("t")).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        let err = provider(&server).fetch_profile(&token("t")).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn slow_provider_times_out_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .expect(1)
            .mount(&server)
            .await;

        let http = crate::auth::providers::http_client(Duration::from_millis(200)).unwrap();
        let p = GithubProvider::with_base_urls(&creds(), http, &server.uri(), &server.uri());
        let err = p.fetch_profile(&token("t")).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
    }
}
