//! `Set-Cookie` values for the session tokens and the OAuth state nonce.
//!
//! Format: `<name>=<value>; HttpOnly; SameSite=<policy>; Path=/; Max-Age=<secs>[; Secure]`

use axum::http::{header::COOKIE, HeaderMap};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Lifetime of the OAuth `state` cookie.
pub const OAUTH_STATE_MAX_AGE_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// Direct login and refresh.
    Strict,
    /// OAuth redirects arrive cross-site and must still carry the cookie.
    Lax,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

pub fn build_cookie(
    name: &str,
    value: &str,
    max_age_secs: i64,
    same_site: SameSite,
    secure: bool,
) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite={}; Path=/; Max-Age={}{}",
        name,
        value,
        same_site.as_str(),
        max_age_secs.max(0),
        secure_flag
    )
}

pub fn clear_cookie(name: &str, secure: bool) -> String {
    build_cookie(name, "", 0, SameSite::Lax, secure)
}

/// Value of cookie `name` across all `Cookie` headers. Empty values count
/// as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|part| part.trim().strip_prefix(prefix.as_str()))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
