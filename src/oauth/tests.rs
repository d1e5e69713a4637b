//! Endpoint tests for the OAuth connector.

use axum::http::StatusCode;
use axum_test::TestServer;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

use super::handlers::authorize_url;
use super::platform;
use crate::api::AppState;
use crate::auth::UserRole;
use crate::config::{Config, OAuthClientConfig};
use crate::testing::{seed_user, server, state_with, test_config};

fn client(platform: &str, provider: Option<&str>) -> OAuthClientConfig {
    OAuthClientConfig {
        client_id: format!("{platform}-id"),
        client_secret: format!("{platform}-secret"),
        token_url: provider.map(|url| format!("{url}/token")),
        userinfo_url: provider.map(|url| format!("{url}/me")),
    }
}

fn config_with(platform: &str, provider: Option<&str>) -> Config {
    let mut config = test_config();
    config.oauth.redirect_base_url = "https://app.roady.test/".to_string();
    config
        .oauth
        .clients
        .insert(platform.to_string(), client(platform, provider));
    config
}

fn slack_state(provider: Option<&str>) -> Arc<AppState> {
    state_with(config_with("slack", provider))
}

/// Start the flow and return the `state` the consent page would echo back.
async fn start_flow(server: &TestServer, token: &str, platform_id: &str) -> String {
    let response = server
        .get(&format!("/api/oauth/connect/{platform_id}"))
        .authorization_bearer(token)
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let location = response.header("location");
    let url = Url::parse(location.to_str().unwrap()).unwrap();
    let consent = Url::parse(platform(platform_id).unwrap().authorize_url).unwrap();
    assert_eq!(url.host_str(), consent.host_str());
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

// =========================================================================
// Platforms and connect
// =========================================================================

#[tokio::test]
async fn platforms_report_configuration() {
    let state = slack_state(None);
    let body: Value = server(&state).get("/api/oauth/platforms").await.json();

    let platforms = body["platforms"].as_array().unwrap();
    assert_eq!(platforms.len(), 6);
    let slack = platforms.iter().find(|p| p["id"] == "slack").unwrap();
    assert_eq!(slack["configured"], true);
    let youtube = platforms.iter().find(|p| p["id"] == "youtube").unwrap();
    assert_eq!(youtube["configured"], false);
}

#[tokio::test]
async fn connect_rejects_unknown_and_unconfigured() {
    let state = slack_state(None);
    let (_, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);

    for platform in ["myspace", "youtube"] {
        server
            .get(&format!("/api/oauth/connect/{platform}"))
            .authorization_bearer(&token)
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn connect_requires_login() {
    let state = slack_state(None);
    server(&state)
        .get("/api/oauth/connect/slack")
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[test]
fn twitter_uses_plain_pkce() {
    let twitter = platform("twitter").unwrap();
    let url = authorize_url(twitter, "tw-id", "https://app/cb", "st4te").unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    assert!(pairs.contains(&("code_challenge".to_string(), "st4te".to_string())));
    assert!(pairs.contains(&("code_challenge_method".to_string(), "plain".to_string())));
    assert!(pairs.contains(&(
        "scope".to_string(),
        "tweet.read tweet.write users.read offline.access".to_string()
    )));
}

// =========================================================================
// Callback and account lifecycle
// =========================================================================

#[tokio::test]
async fn callback_stores_tokens_once() {
    let mut provider = mockito::Server::new_async().await;
    let exchange = provider
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "the-code".into()),
            Matcher::UrlEncoded(
                "redirect_uri".into(),
                "https://app.roady.test/api/oauth/callback/slack".into(),
            ),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "xoxb-1", "refresh_token": "r-1", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;

    let state = slack_state(Some(&provider.url()));
    let (user, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);
    let oauth_state = start_flow(&server, &token, "slack").await;

    let done: Value = server
        .get("/api/oauth/callback/slack")
        .add_query_param("code", "the-code")
        .add_query_param("state", &oauth_state)
        .await
        .json();
    assert_eq!(done["success"], true);
    assert_eq!(done["has_refresh"], true);
    assert_eq!(done["expires_in"], 3600);

    // states are single use
    server
        .get("/api/oauth/callback/slack")
        .add_query_param("code", "the-code")
        .add_query_param("state", &oauth_state)
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    exchange.assert_async().await;

    let stored = state
        .lock_db()
        .unwrap()
        .connected_account(&user.id, "slack")
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "xoxb-1");

    let status: Value = server
        .get("/api/oauth/status/slack")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(status["connected"], true);
    assert_eq!(status["expired"], false);

    let connected: Value = server
        .get("/api/oauth/connected")
        .authorization_bearer(&token)
        .await
        .json();
    assert!(connected["accounts"]["slack"].is_object());
    assert!(connected["accounts"]["slack"].get("access_token").is_none());
}

#[tokio::test]
async fn callback_records_the_platform_profile() {
    let mut provider = mockito::Server::new_async().await;
    provider
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "dc-token", "expires_in": 600}"#)
        .create_async()
        .await;
    let profile = provider
        .mock("GET", "/me")
        .match_header("authorization", "Bearer dc-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "42", "username": "chef_chantier", "discriminator": "0007", "email": "chef@btp.test"}"#)
        .expect(1)
        .create_async()
        .await;

    let state = state_with(config_with("discord", Some(&provider.url())));
    let (_, token) = seed_user(&state, UserRole::ChefProjet);
    let server = server(&state);
    let oauth_state = start_flow(&server, &token, "discord").await;
    server
        .get("/api/oauth/callback/discord")
        .add_query_param("code", "c")
        .add_query_param("state", &oauth_state)
        .await
        .assert_status_ok();
    profile.assert_async().await;

    let status: Value = server
        .get("/api/oauth/status/discord")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(status["username"], "chef_chantier#0007");
    assert_eq!(status["email"], "chef@btp.test");

    let connected: Value = server
        .get("/api/oauth/connected")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(connected["accounts"]["discord"]["username"], "chef_chantier#0007");
    assert_eq!(connected["accounts"]["discord"]["email"], "chef@btp.test");
}

#[tokio::test]
async fn profile_failure_still_connects() {
    let mut provider = mockito::Server::new_async().await;
    provider
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "tw-token", "refresh_token": "tw-r"}"#)
        .create_async()
        .await;
    provider
        .mock("GET", "/me")
        .with_status(503)
        .create_async()
        .await;

    let state = state_with(config_with("twitter", Some(&provider.url())));
    let (user, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);
    let oauth_state = start_flow(&server, &token, "twitter").await;
    server
        .get("/api/oauth/callback/twitter")
        .add_query_param("code", "c")
        .add_query_param("state", &oauth_state)
        .await
        .assert_status_ok();

    let stored = state
        .lock_db()
        .unwrap()
        .connected_account(&user.id, "twitter")
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "tw-token");
    assert_eq!(stored.username, None);
}

#[tokio::test]
async fn expired_state_is_refused() {
    let mut provider = mockito::Server::new_async().await;
    let exchange = provider
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token": "never"}"#)
        .expect(0)
        .create_async()
        .await;

    let mut config = config_with("slack", Some(&provider.url()));
    config.oauth.state_ttl_secs = 0;
    let state = state_with(config);
    let (_, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);
    let oauth_state = start_flow(&server, &token, "slack").await;

    let response = server
        .get("/api/oauth/callback/slack")
        .add_query_param("code", "c")
        .add_query_param("state", &oauth_state)
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Invalid state"));
    exchange.assert_async().await;
}

#[tokio::test]
async fn callback_reports_provider_denial() {
    let state = slack_state(None);
    let response = server(&state)
        .get("/api/oauth/callback/slack")
        .add_query_param("error", "access_denied")
        .add_query_param("error_description", "User cancelled")
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("User cancelled"));
}

#[tokio::test]
async fn refresh_replaces_access_token() {
    let mut provider = mockito::Server::new_async().await;
    provider
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "old", "refresh_token": "r-1"}"#)
        .create_async()
        .await;
    let refresh = provider
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "r-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "new", "expires_in": 60}"#)
        .create_async()
        .await;

    let state = slack_state(Some(&provider.url()));
    let (user, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);
    let oauth_state = start_flow(&server, &token, "slack").await;
    server
        .get("/api/oauth/callback/slack")
        .add_query_param("code", "c")
        .add_query_param("state", &oauth_state)
        .await
        .assert_status_ok();

    server
        .post("/api/oauth/refresh/slack")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();

    refresh.assert_async().await;
    let stored = state
        .lock_db()
        .unwrap()
        .connected_account(&user.id, "slack")
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "new");
    assert_eq!(stored.refresh_token.as_deref(), Some("r-1"));
    assert!(stored.expires_at.is_some());
}

#[tokio::test]
async fn missing_connection_is_404() {
    let state = slack_state(None);
    let (_, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);

    server
        .post("/api/oauth/refresh/slack")
        .authorization_bearer(&token)
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .delete("/api/oauth/disconnect/slack")
        .authorization_bearer(&token)
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let status: Value = server
        .get("/api/oauth/status/slack")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(status["connected"], false);
}
