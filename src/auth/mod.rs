//! Authentication and role-based access control.
//!
//! Endpoints:
//! - POST /auth/register - Create an account (JSON)
//! - POST /auth/login - OAuth2 password grant (form-encoded)
//! - POST /auth/refresh - Exchange a refresh token for a new pair
//! - GET /auth/me - Current user and token scopes
//! - POST /auth/password/change - Change own password
//! - POST /auth/logout - Acknowledge logout

mod extract;
mod handlers;
mod password;
mod rbac;
#[cfg(test)]
mod tests;
mod token;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use extract::{authenticate, CurrentUser};
pub use password::{hash_password, hash_password_async, verify_password, verify_password_async};
pub use rbac::{Permission, UserRole};
pub use token::{Claims, TokenError, TokenKind, TokenPair, TokenService};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/me", get(handlers::me))
        .route("/auth/password/change", post(handlers::change_password))
        .route("/auth/logout", post(handlers::logout))
}
