use crate::state::AppState;
use axum::Router;

pub mod cookies;
pub mod credentials;
mod dto;
pub mod errors;
pub(crate) mod extractors;
pub mod handlers;
pub mod identity;
#[cfg(test)]
pub(crate) mod memory;
mod password;
pub mod providers;
pub mod repo;
pub mod repo_types;
pub mod sessions;
pub mod store;
pub mod token;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
