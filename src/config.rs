use time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub cookie_secure: bool,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_minutes: 15,
            refresh_ttl_minutes: 60 * 24 * 7,
            cookie_secure: true,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::minutes(self.refresh_ttl_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub github: Option<ProviderCredentials>,
    pub google: Option<ProviderCredentials>,
    pub http_timeout_secs: u64,
    /// Refuse to link a provider identity to an existing user by email
    /// unless the provider asserts the email is verified.
    pub require_verified_email_for_linking: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub public_url: String,
    pub frontend_url: String,
    pub session: SessionConfig,
    pub oauth: OAuthConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn provider_from_env(prefix: &str) -> Option<ProviderCredentials> {
    let client_id = std::env::var(format!("{prefix}_CLIENT_ID"))
        .ok()
        .filter(|v| !v.trim().is_empty())?;
    let client_secret = std::env::var(format!("{prefix}_CLIENT_SECRET"))
        .ok()
        .filter(|v| !v.trim().is_empty())?;
    Some(ProviderCredentials {
        client_id,
        client_secret,
    })
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let defaults = SessionConfig::default();
        let session = SessionConfig {
            access_ttl_minutes: env_parse("ACCESS_TTL_MINUTES")
                .unwrap_or(defaults.access_ttl_minutes),
            refresh_ttl_minutes: env_parse("REFRESH_TTL_MINUTES")
                .unwrap_or(defaults.refresh_ttl_minutes),
            cookie_secure: env_parse("COOKIE_SECURE").unwrap_or(defaults.cookie_secure),
            sweep_interval_secs: env_parse("SESSION_SWEEP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
        };
        if session.access_ttl_minutes <= 0 || session.access_ttl_minutes >= session.refresh_ttl_minutes {
            anyhow::bail!(
                "ACCESS_TTL_MINUTES ({}) must be positive and shorter than REFRESH_TTL_MINUTES ({})",
                session.access_ttl_minutes,
                session.refresh_ttl_minutes
            );
        }

        let oauth = OAuthConfig {
            github: provider_from_env("GITHUB"),
            google: provider_from_env("GOOGLE"),
            http_timeout_secs: env_parse("OAUTH_HTTP_TIMEOUT_SECS").unwrap_or(10),
            require_verified_email_for_linking: env_parse(
                "OAUTH_REQUIRE_VERIFIED_EMAIL_FOR_LINKING",
            )
            .unwrap_or(false),
        };

        Ok(Self {
            database_url,
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            session,
            oauth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_ttls() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.access_ttl(), Duration::minutes(15));
        assert_eq!(cfg.refresh_ttl(), Duration::days(7));
        assert!(cfg.access_ttl() < cfg.refresh_ttl());
    }

    #[test]
    fn default_sweep_runs_hourly() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.sweep_interval_secs, 3600);
        assert!(cfg.cookie_secure);
    }
}
