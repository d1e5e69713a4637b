use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

use super::{Claims, Permission, TokenKind};
use crate::api::AppState;
use crate::error::AppError;
use crate::store::User;

/// The authenticated caller, resolved from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    /// Checks the token's scopes, not the role table, so narrowed tokens stay narrow.
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.claims.has_scope(permission.as_str()) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("Permission required: {permission}")))
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.claims.has_scope(permission.as_str())
    }
}

/// Decode an access token and load its still-active user.
pub fn authenticate(state: &AppState, token: &str) -> Result<CurrentUser, AppError> {
    let claims = state.tokens.decode(token, TokenKind::Access)?;
    let user = {
        let db = state.lock_db()?;
        db.get_user(&claims.sub)?
    };
    match user {
        Some(user) if user.is_active => Ok(CurrentUser { user, claims }),
        Some(_) => Err(AppError::Unauthorized("Account disabled".to_string())),
        None => Err(AppError::Unauthorized("User not found".to_string())),
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        authenticate(state, token)
    }
}

/// `Option<CurrentUser>`: no `Authorization` header is `None`, a bad token is still 401.
impl OptionalFromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Malformed bearer token".to_string()))?;
        authenticate(state, token).map(Some)
    }
}
