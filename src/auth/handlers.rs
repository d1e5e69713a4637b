//! HTTP handlers for registration, login and session management.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use super::{hash_password_async, verify_password_async, CurrentUser, Permission, TokenKind, TokenPair, UserRole};
use crate::api::AppState;
use crate::error::{AppError, AppForm, AppJson, Validator};
use crate::store::{NewUser, User};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// OAuth2 password grant.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: User,
    pub scopes: Vec<String>,
}

fn check_password(validator: &mut Validator, field: &str, password: &str, min_len: usize) {
    validator.check(
        password.chars().count() >= min_len,
        field,
        &format!("must be at least {min_len} characters"),
    );
}

/// Role and company for a new account. Anonymous sign-ups get the default
/// role and no company; anything else needs `admin:users`, within the
/// caller's own company unless the caller is a super admin.
fn registration_scope(
    caller: Option<&CurrentUser>,
    role: Option<UserRole>,
    company_id: Option<String>,
) -> Result<(UserRole, Option<String>), AppError> {
    let Some(caller) = caller.filter(|c| c.can(Permission::AdminUsers)) else {
        if role.is_some_and(|r| r != UserRole::default()) || company_id.is_some() {
            return Err(AppError::Forbidden(
                "Assigning a role or company requires admin:users".to_string(),
            ));
        }
        return Ok((UserRole::default(), None));
    };

    let super_admin = caller.user.role == UserRole::SuperAdmin;
    let role = role.unwrap_or_default();
    if role == UserRole::SuperAdmin && !super_admin {
        return Err(AppError::Forbidden("Role cannot be assigned".to_string()));
    }
    let company_id = match company_id {
        Some(company) if !super_admin && caller.user.company_id.as_deref() != Some(company.as_str()) => {
            return Err(AppError::Forbidden("Cannot register users in another company".to_string()));
        }
        Some(company) => Some(company),
        None => caller.user.company_id.clone(),
    };
    Ok((role, company_id))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    caller: Option<CurrentUser>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut validator = Validator::new();
    validator
        .check(EMAIL_REGEX.is_match(request.email.trim()), "email", "must be a valid email address")
        .non_empty("full_name", &request.full_name);
    check_password(&mut validator, "password", &request.password, state.config.auth.min_password_length);
    validator.finish()?;

    let (role, company_id) = registration_scope(caller.as_ref(), request.role, request.company_id)?;

    let password_hash = hash_password_async(request.password).await?;
    let user = {
        let db = state.lock_db()?;
        db.create_user(&NewUser {
            email: request.email.trim(),
            password_hash: &password_hash,
            full_name: request.full_name.trim(),
            role,
            company_id: company_id.as_deref(),
            phone: request.phone.as_deref(),
        })?
    };

    tracing::info!(
        user_id = %user.id,
        role = %user.role,
        created_by = caller.as_ref().map(|c| c.id()),
        "User registered"
    );
    Ok((StatusCode::CREATED, Json(user)))
}

/// Requested scopes intersected with the role's permissions. `None` keeps the full set.
fn narrow_scopes(role: UserRole, scope: Option<&str>) -> Option<Vec<String>> {
    let requested: Vec<&str> = scope?.split_whitespace().collect();
    if requested.is_empty() {
        return None;
    }
    Some(
        role.permissions()
            .iter()
            .map(Permission::as_str)
            .filter(|p| requested.contains(p))
            .map(str::to_string)
            .collect(),
    )
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    AppForm(form): AppForm<LoginForm>,
) -> Result<Json<TokenPair>, AppError> {
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());
    let auth = &state.config.auth;

    let user = {
        let db = state.lock_db()?;
        db.find_user_by_email(form.username.trim())?
    }
    .ok_or_else(invalid)?;

    if !user.is_active {
        return Err(invalid());
    }
    if user.is_locked(Utc::now()) {
        tracing::warn!(user_id = %user.id, "Login attempt on locked account");
        return Err(AppError::Locked("Account locked".to_string()));
    }

    if !verify_password_async(form.password, user.password_hash.clone()).await? {
        let updated = {
            let db = state.lock_db()?;
            db.record_failed_login(&user.id, auth.max_failed_attempts, Duration::minutes(auth.lockout_minutes))?
        };
        tracing::warn!(
            user_id = %user.id,
            attempts = updated.failed_login_attempts,
            "Failed login"
        );
        return Err(invalid());
    }

    {
        let db = state.lock_db()?;
        db.record_successful_login(&user.id)?;
    }
    let tokens = state
        .tokens
        .issue_pair(&user, narrow_scopes(user.role, form.scope.as_deref()))?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(tokens))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let claims = state.tokens.decode(&request.refresh_token, TokenKind::Refresh)?;
    let user = {
        let db = state.lock_db()?;
        db.get_user(&claims.sub)?
    };
    match user {
        Some(user) if user.is_active => Ok(Json(state.tokens.issue_pair(&user, None)?)),
        _ => Err(AppError::Unauthorized("User not found".to_string())),
    }
}

pub async fn me(current: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        scopes: current.claims.scopes,
        user: current.user,
    })
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    AppJson(request): AppJson<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut validator = Validator::new();
    check_password(&mut validator, "new_password", &request.new_password, state.config.auth.min_password_length);
    validator.finish()?;

    if !verify_password_async(request.current_password, current.user.password_hash.clone()).await? {
        return Err(AppError::BadRequest("Current password is incorrect".to_string()));
    }

    let password_hash = hash_password_async(request.new_password).await?;
    {
        let db = state.lock_db()?;
        db.update_password(current.id(), &password_hash)?;
    }
    tracing::info!(user_id = %current.id(), "Password changed");
    Ok(Json(serde_json::json!({"message": "Password updated"})))
}

/// Tokens are stateless; logout only confirms the caller was authenticated.
pub async fn logout(current: CurrentUser) -> Json<serde_json::Value> {
    tracing::info!(user_id = %current.id(), "User logged out");
    Json(serde_json::json!({"message": "Logged out"}))
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn narrowing_keeps_only_role_permissions() {
        let scopes = narrow_scopes(UserRole::Client, Some("project:read finance:edit")).unwrap();
        assert_eq!(scopes, vec!["project:read"]);
    }

    #[test]
    fn empty_scope_keeps_full_set() {
        assert!(narrow_scopes(UserRole::Client, Some("  ")).is_none());
        assert!(narrow_scopes(UserRole::Client, None).is_none());
    }

    #[test]
    fn email_pattern() {
        assert!(EMAIL_REGEX.is_match("chef@roady.ca"));
        assert!(!EMAIL_REGEX.is_match("chef.roady.ca"));
        assert!(!EMAIL_REGEX.is_match("chef@roady"));
    }
}
