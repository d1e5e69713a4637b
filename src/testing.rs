//! Shared fixtures for endpoint tests.

use axum_test::TestServer;
use std::sync::Arc;

use crate::api::{create_router, AppState};
use crate::auth::UserRole;
use crate::cache::MemoryStore;
use crate::config::Config;
use crate::store::{NewUser, Store, User};

/// Defaults with no backoff so retry tests run instantly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.retry_base_delay_ms = 0;
    config
}

pub fn state_with(config: Config) -> Arc<AppState> {
    let store = Store::in_memory().unwrap();
    Arc::new(AppState::new(config, store, Arc::new(MemoryStore::new())).unwrap())
}

pub fn test_state() -> Arc<AppState> {
    state_with(test_config())
}

pub fn server(state: &Arc<AppState>) -> TestServer {
    TestServer::new(create_router(state.clone())).unwrap()
}

/// Insert a user with `role` and return it with a full-scope access token.
/// The stored hash is not a real password; use the register endpoint when
/// a test needs to log in.
pub fn seed_user(state: &AppState, role: UserRole) -> (User, String) {
    seed_user_in(state, role, None)
}

pub fn seed_user_in(state: &AppState, role: UserRole, company_id: Option<&str>) -> (User, String) {
    let email = format!("{}-{}@roady.test", role, uuid::Uuid::new_v4().simple());
    let user = state
        .lock_db()
        .unwrap()
        .create_user(&NewUser {
            email: &email,
            password_hash: "unusable",
            full_name: "Test User",
            role,
            company_id,
            phone: None,
        })
        .unwrap();
    let token = state.tokens.issue_access(&user, None).unwrap();
    (user, token)
}
