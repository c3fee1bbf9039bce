use std::time::Duration;

mod app;
mod auth;
mod clock;
mod config;
mod db;
mod state;

use crate::auth::sessions::SessionManager;
use crate::config::AppConfig;
use crate::state::AppState;

/// Periodically drop sessions whose refresh token has expired. Validation
/// never relies on this having run.
fn spawn_session_sweep(sessions: SessionManager, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.purge_expired().await {
                tracing::error!(error = %e, "session sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tripkeeper=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let db = db::connect(&config).await?;
    db::migrate(&db).await;

    let sweep_every = Duration::from_secs(config.session.sweep_interval_secs);
    let app_state = AppState::init(config, db)?;
    spawn_session_sweep(app_state.sessions.clone(), sweep_every);

    app::serve(app::build_app(app_state)).await
}
