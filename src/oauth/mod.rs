//! Social account connections over OAuth2.
//!
//! Endpoints:
//! - GET /api/oauth/platforms - Supported platforms and whether each is configured
//! - GET /api/oauth/connect/{platform} - Redirect to the platform's consent page
//! - GET /api/oauth/callback/{platform} - Exchange the code, fetch the profile and store tokens
//! - POST /api/oauth/refresh/{platform} - Refresh the stored access token
//! - DELETE /api/oauth/disconnect/{platform} - Forget the connection
//! - GET /api/oauth/connected - Caller's connected accounts
//! - GET /api/oauth/status/{platform} - Connection and expiry for one platform

mod handlers;
mod platforms;
#[cfg(test)]
mod tests;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use platforms::{platform, Platform, Profile, PLATFORMS};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/oauth/platforms", get(handlers::list_platforms))
        .route("/api/oauth/connect/{platform}", get(handlers::connect))
        .route("/api/oauth/callback/{platform}", get(handlers::callback))
        .route("/api/oauth/refresh/{platform}", post(handlers::refresh))
        .route("/api/oauth/disconnect/{platform}", delete(handlers::disconnect))
        .route("/api/oauth/connected", get(handlers::connected))
        .route("/api/oauth/status/{platform}", get(handlers::status))
}
