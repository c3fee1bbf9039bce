use axum::{
    extract::{Path, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        cookies::{
            build_cookie, clear_cookie, read_cookie, SameSite, ACCESS_COOKIE, OAUTH_STATE_COOKIE,
            OAUTH_STATE_MAX_AGE_SECS, REFRESH_COOKIE,
        },
        dto::{
            ChangePasswordRequest, LoginRequest, OAuthCallbackQuery, PublicUser, RefreshResponse,
            RegisterRequest, SessionResponse,
        },
        errors::AuthError,
        extractors::AuthUser,
        identity::IdentityResolver,
        providers::ProviderId,
        repo_types::User,
        sessions::IssuedSession,
        token::generate_token,
    },
    state::AppState,
};

type HandlerError = (StatusCode, String);

const MIN_PASSWORD_LEN: usize = 8;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/password", post(change_password))
        .route("/auth/oauth/:provider/start", get(oauth_start))
        .route("/auth/oauth/:provider/callback", get(oauth_callback))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

/// Map a service error to a status and client-safe message. Internal and
/// provider details go to the log only.
pub(crate) fn reject(err: AuthError) -> HandlerError {
    match err {
        AuthError::AuthenticationFailed => {
            (StatusCode::UNAUTHORIZED, "Invalid credentials".into())
        }
        AuthError::SessionInvalid => (StatusCode::UNAUTHORIZED, "Invalid session".into()),
        AuthError::SessionExpired => (StatusCode::UNAUTHORIZED, "Session expired".into()),
        AuthError::Provider(detail) => {
            error!(detail = %detail, "oauth provider error");
            (
                StatusCode::BAD_GATEWAY,
                "Sign-in provider unavailable, please try again".into(),
            )
        }
        AuthError::Conflict(what) => {
            warn!(conflict = %what, "conflict");
            (StatusCode::CONFLICT, "Account already exists".into())
        }
        AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        AuthError::Internal(e) => {
            error!(error = ?e, "internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
        }
    }
}

fn max_age(until: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (until - now).whole_seconds()
}

fn session_cookies(
    state: &AppState,
    issued: &IssuedSession,
    same_site: SameSite,
) -> [(axum::http::HeaderName, String); 2] {
    let secure = state.config.session.cookie_secure;
    let now = state.sessions.now();
    [
        (
            SET_COOKIE,
            build_cookie(
                ACCESS_COOKIE,
                &issued.tokens.access_token,
                max_age(issued.session.access_expires_at, now),
                same_site,
                secure,
            ),
        ),
        (
            SET_COOKIE,
            build_cookie(
                REFRESH_COOKIE,
                &issued.tokens.refresh_token,
                max_age(issued.session.refresh_expires_at, now),
                same_site,
                secure,
            ),
        ),
    ]
}

fn cleared_cookies(state: &AppState) -> [(axum::http::HeaderName, String); 2] {
    let secure = state.config.session.cookie_secure;
    [
        (SET_COOKIE, clear_cookie(ACCESS_COOKIE, secure)),
        (SET_COOKIE, clear_cookie(REFRESH_COOKIE, secure)),
    ]
}

fn session_response(user: &User, issued: &IssuedSession) -> SessionResponse {
    SessionResponse {
        user: PublicUser::from(user),
        access_expires_at: issued.session.access_expires_at,
        refresh_expires_at: issued.session.refresh_expires_at,
    }
}

fn find_resolver(state: &AppState, provider: &str) -> Result<(ProviderId, IdentityResolver), HandlerError> {
    let id: ProviderId = provider.parse().map_err(reject)?;
    let resolver = state
        .identities
        .get(&id)
        .cloned()
        .ok_or((StatusCode::NOT_FOUND, "Provider not configured".into()))?;
    Ok((id, resolver))
}

fn callback_uri(state: &AppState, provider: ProviderId) -> String {
    format!(
        "{}/api/v1/auth/oauth/{}/callback",
        state.config.public_url.trim_end_matches('/'),
        provider
    )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, HandlerError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    let user = state
        .credentials
        .register(&payload.name, &payload.email, &payload.password)
        .await
        .map_err(reject)?;
    let issued = state.sessions.create_session(user.id).await.map_err(reject)?;

    Ok((
        StatusCode::CREATED,
        AppendHeaders(session_cookies(&state, &issued, SameSite::Strict)),
        Json(session_response(&user, &issued)),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, HandlerError> {
    let user = state
        .credentials
        .verify_credentials(&payload.email, &payload.password)
        .await
        .map_err(reject)?;
    let issued = state.sessions.create_session(user.id).await.map_err(reject)?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        AppendHeaders(session_cookies(&state, &issued, SameSite::Strict)),
        Json(session_response(&user, &issued)),
    )
        .into_response())
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let refresh_token = read_cookie(&headers, REFRESH_COOKIE)
        .ok_or((StatusCode::UNAUTHORIZED, "Missing refresh token".into()))?;

    let refreshed = state
        .sessions
        .refresh_access_token(&refresh_token)
        .await
        .map_err(reject)?;

    let cookie = build_cookie(
        ACCESS_COOKIE,
        &refreshed.access_token,
        max_age(refreshed.session.access_expires_at, state.sessions.now()),
        SameSite::Strict,
        state.config.session.cookie_secure,
    );
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(RefreshResponse {
            access_expires_at: refreshed.session.access_expires_at,
        }),
    )
        .into_response())
}

/// Always succeeds for the client; ending an unknown session is a no-op.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    if let Some(token) = read_cookie(&headers, ACCESS_COOKIE) {
        state
            .sessions
            .end_session_by_access_token(&token)
            .await
            .map_err(reject)?;
    }
    if let Some(token) = read_cookie(&headers, REFRESH_COOKIE) {
        state
            .sessions
            .end_session_by_refresh_token(&token)
            .await
            .map_err(reject)?;
    }
    Ok((StatusCode::NO_CONTENT, AppendHeaders(cleared_cookies(&state))).into_response())
}

#[instrument(skip(state, auth), fields(user_id = %auth.user_id, session_id = %auth.session_id))]
pub async fn logout_all(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, HandlerError> {
    state
        .sessions
        .end_all_user_sessions(auth.user_id)
        .await
        .map_err(reject)?;
    Ok((StatusCode::NO_CONTENT, AppendHeaders(cleared_cookies(&state))).into_response())
}

/// Changing the password ends every session, then issues a fresh one for
/// this client.
#[instrument(skip(state, auth, payload), fields(user_id = %auth.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Response, HandlerError> {
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    state
        .credentials
        .change_password(auth.user_id, &payload.current_password, &payload.new_password)
        .await
        .map_err(reject)?;
    state
        .sessions
        .end_all_user_sessions(auth.user_id)
        .await
        .map_err(reject)?;

    let user = state
        .users
        .find_by_id(auth.user_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".into()))?;
    let issued = state.sessions.create_session(user.id).await.map_err(reject)?;

    Ok((
        AppendHeaders(session_cookies(&state, &issued, SameSite::Strict)),
        Json(session_response(&user, &issued)),
    )
        .into_response())
}

#[instrument(skip(state))]
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Response, HandlerError> {
    let (id, resolver) = find_resolver(&state, &provider)?;
    let nonce = generate_token();
    let url = resolver
        .provider()
        .authorization_url(&callback_uri(&state, id), &nonce);

    let cookie = build_cookie(
        OAUTH_STATE_COOKIE,
        &nonce,
        OAUTH_STATE_MAX_AGE_SECS,
        SameSite::Lax,
        state.config.session.cookie_secure,
    );
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to(&url)).into_response())
}

#[instrument(skip(state, headers, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let (id, resolver) = find_resolver(&state, &provider)?;

    if let Some(error) = query.error {
        warn!(provider = %id, error = %error, "provider denied authorization");
        return Err((StatusCode::UNAUTHORIZED, "Authorization was denied".into()));
    }

    let expected = read_cookie(&headers, OAUTH_STATE_COOKIE);
    if expected.is_none() || expected != query.state {
        warn!(provider = %id, "oauth state mismatch");
        return Err((StatusCode::BAD_REQUEST, "Invalid OAuth state".into()));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "Missing authorization code".into()))?;

    let user = resolver
        .authenticate(&code, &callback_uri(&state, id))
        .await
        .map_err(reject)?;
    let issued = state.sessions.create_session(user.id).await.map_err(reject)?;

    let [access, refresh] = session_cookies(&state, &issued, SameSite::Lax);
    let clear_state = (
        SET_COOKIE,
        clear_cookie(OAUTH_STATE_COOKIE, state.config.session.cookie_secure),
    );
    info!(user_id = %user.id, provider = %id, "oauth login");
    Ok((
        AppendHeaders([access, refresh, clear_state]),
        Redirect::to(&state.config.frontend_url),
    )
        .into_response())
}

#[instrument(skip(state, auth), fields(user_id = %auth.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PublicUser>, HandlerError> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| {
            error!(user_id = %auth.user_id, "session owner not found");
            (StatusCode::UNAUTHORIZED, "User not found".to_string())
        })?;
    let accounts = state
        .accounts
        .list_for_user(user.id)
        .await
        .map_err(|e| reject(e.into()))?;

    Ok(Json(PublicUser::new(&user, &accounts)))
}
