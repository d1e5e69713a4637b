use axum::{
    extract::{Path, State},
    response::Redirect,
    Json,
};
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::platforms::{platform, Platform, Profile, PLATFORMS};
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::config::{OAuthClientConfig, OAuthConfig};
use crate::error::{AppError, AppQuery};
use crate::store::ConnectedAccount;

const STATE_LEN: usize = 43;

#[derive(Debug, Serialize)]
pub struct PlatformInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub configured: bool,
    pub scopes: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    pub platform: &'static str,
    pub has_refresh: bool,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PlatformStatus {
    pub connected: bool,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

fn known_platform(id: &str) -> Result<&'static Platform, AppError> {
    platform(id).ok_or_else(|| AppError::BadRequest(format!("Unknown platform: {id}")))
}

fn credentials<'a>(config: &'a OAuthConfig, platform: &Platform) -> Option<&'a OAuthClientConfig> {
    config
        .clients
        .get(platform.id)
        .filter(|c| !c.client_id.is_empty())
}

fn configured(config: &OAuthConfig, platform: &Platform) -> Result<OAuthClientConfig, AppError> {
    credentials(config, platform)
        .cloned()
        .ok_or_else(|| AppError::BadRequest(format!("{} is not configured", platform.id)))
}

fn redirect_uri(config: &OAuthConfig, platform: &Platform) -> String {
    format!(
        "{}/api/oauth/callback/{}",
        config.redirect_base_url.trim_end_matches('/'),
        platform.id
    )
}

fn state_ttl(config: &OAuthConfig) -> Duration {
    Duration::seconds(config.state_ttl_secs)
}

fn new_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

/// Authorization URL with the platform's extra parameters.
pub(crate) fn authorize_url(
    platform: &Platform,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<Url, AppError> {
    let scope = platform.scopes.join(" ");
    let mut params = vec![
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("response_type", "code"),
        ("scope", scope.as_str()),
        ("state", state),
        ("access_type", "offline"),
    ];
    if platform.pkce {
        params.push(("code_challenge_method", "plain"));
        params.push(("code_challenge", state));
    }
    Url::parse_with_params(platform.authorize_url, &params)
        .map_err(|e| AppError::Internal(format!("Invalid authorize URL: {e}")))
}

async fn token_request(
    state: &AppState,
    platform: &Platform,
    client: &OAuthClientConfig,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AppError> {
    let url = client.token_url.as_deref().unwrap_or(platform.token_url);
    let response = state
        .http
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("{} token request failed: {e}", platform.id)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(platform = platform.id, status = status.as_u16(), body = %body, "Token endpoint refused");
        return Err(AppError::Upstream(format!(
            "{} token endpoint returned HTTP {status}",
            platform.id
        )));
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| AppError::Upstream(format!("{} token response unreadable: {e}", platform.id)))
}

/// Profile lookup is best effort: a failure leaves the fields empty.
async fn fetch_profile(
    state: &AppState,
    platform: &Platform,
    client: &OAuthClientConfig,
    access_token: &str,
) -> Profile {
    let Some(url) = client.userinfo_url.as_deref().or(platform.userinfo_url) else {
        return Profile::default();
    };
    let response = match state.http.get(url).bearer_auth(access_token).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(platform = platform.id, error = %e, "Profile request failed");
            return Profile::default();
        }
    };
    if !response.status().is_success() {
        warn!(platform = platform.id, status = response.status().as_u16(), "Profile endpoint refused");
        return Profile::default();
    }
    match response.json::<serde_json::Value>().await {
        Ok(body) => platform.profile(&body),
        Err(e) => {
            warn!(platform = platform.id, error = %e, "Profile response unreadable");
            Profile::default()
        }
    }
}

fn expiry(expires_in: Option<i64>) -> Option<chrono::DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + Duration::seconds(secs))
}

fn not_connected() -> AppError {
    AppError::NotFound("Account not connected".to_string())
}

pub async fn list_platforms(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let platforms: Vec<PlatformInfo> = PLATFORMS
        .iter()
        .map(|p| PlatformInfo {
            id: p.id,
            name: p.name,
            configured: credentials(&state.config.oauth, p).is_some(),
            scopes: p.scopes,
        })
        .collect();
    Json(serde_json::json!({ "platforms": platforms }))
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(platform_id): Path<String>,
) -> Result<Redirect, AppError> {
    let platform = known_platform(&platform_id)?;
    let client = configured(&state.config.oauth, platform)?;

    let oauth_state = new_state();
    state
        .lock_db()?
        .save_oauth_state(&oauth_state, platform.id, user.id(), state_ttl(&state.config.oauth))?;

    let url = authorize_url(
        platform,
        &client.client_id,
        &redirect_uri(&state.config.oauth, platform),
        &oauth_state,
    )?;
    info!(platform = platform.id, user = user.id(), "OAuth flow started");
    Ok(Redirect::to(url.as_str()))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(platform_id): Path<String>,
    AppQuery(query): AppQuery<CallbackQuery>,
) -> Result<Json<CallbackResponse>, AppError> {
    let platform = known_platform(&platform_id)?;
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or(error);
        return Err(AppError::BadRequest(format!("Authorization denied: {detail}")));
    }

    let oauth_state = query
        .state
        .ok_or_else(|| AppError::BadRequest("Missing state".to_string()))?;
    let pending = state
        .lock_db()?
        .take_oauth_state(&oauth_state, state_ttl(&state.config.oauth))?
        .filter(|s| s.platform == platform.id)
        .ok_or_else(|| AppError::BadRequest("Invalid state".to_string()))?;
    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("No authorization code received".to_string()))?;

    let client = configured(&state.config.oauth, platform)?;
    let redirect = redirect_uri(&state.config.oauth, platform);
    let mut form = vec![
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("code", code.as_str()),
        ("redirect_uri", redirect.as_str()),
        ("grant_type", "authorization_code"),
    ];
    if platform.pkce {
        form.push(("code_verifier", oauth_state.as_str()));
    }
    let tokens = token_request(&state, platform, &client, &form).await?;
    let profile = fetch_profile(&state, platform, &client, &tokens.access_token).await;

    state.lock_db()?.upsert_connected_account(&ConnectedAccount {
        user_id: pending.user_id.clone(),
        platform: platform.id.to_string(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.clone(),
        expires_at: expiry(tokens.expires_in),
        username: profile.username.clone(),
        email: profile.email,
        profile_url: profile.profile_url,
        connected_at: Utc::now(),
    })?;
    info!(
        platform = platform.id,
        user = %pending.user_id,
        username = profile.username.as_deref().unwrap_or("-"),
        "OAuth account connected"
    );

    Ok(Json(CallbackResponse {
        success: true,
        platform: platform.id,
        has_refresh: tokens.refresh_token.is_some(),
        expires_in: tokens.expires_in,
    }))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(platform_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = known_platform(&platform_id)?;
    let account = state
        .lock_db()?
        .connected_account(user.id(), platform.id)?
        .ok_or_else(not_connected)?;
    let refresh_token = account
        .refresh_token
        .clone()
        .ok_or_else(|| AppError::BadRequest("No refresh token available".to_string()))?;
    let client = configured(&state.config.oauth, platform)?;

    let form = [
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    let tokens = token_request(&state, platform, &client, &form).await?;

    state.lock_db()?.upsert_connected_account(&ConnectedAccount {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_at: expiry(tokens.expires_in),
        ..account
    })?;
    Ok(Json(serde_json::json!({"success": true, "message": "Token refreshed successfully"})))
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(platform_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = known_platform(&platform_id)?;
    state.lock_db()?.delete_connected_account(user.id(), platform.id)?;
    info!(platform = platform.id, user = user.id(), "OAuth account disconnected");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Disconnected from {}", platform.id)
    })))
}

pub async fn connected(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let accounts: BTreeMap<String, ConnectedAccount> = state
        .lock_db()?
        .connected_accounts(user.id())?
        .into_iter()
        .map(|a| (a.platform.clone(), a))
        .collect();
    Ok(Json(serde_json::json!({ "accounts": accounts })))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(platform_id): Path<String>,
) -> Result<Json<PlatformStatus>, AppError> {
    let platform = known_platform(&platform_id)?;
    let account = state.lock_db()?.connected_account(user.id(), platform.id)?;
    let status = match account {
        Some(account) => PlatformStatus {
            connected: true,
            platform: platform.id.to_string(),
            username: account.username,
            email: account.email,
            profile_url: account.profile_url,
            expired: Some(account.expires_at.is_some_and(|t| t < Utc::now())),
            expires_at: account.expires_at,
        },
        None => PlatformStatus {
            connected: false,
            platform: platform.id.to_string(),
            username: None,
            email: None,
            profile_url: None,
            expired: None,
            expires_at: None,
        },
    };
    Ok(Json(status))
}
