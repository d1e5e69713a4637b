//! Endpoint tests for registration, login, refresh and lockout.

use axum::http::StatusCode;
use axum_test::TestServer;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::auth::UserRole;
use crate::testing::{seed_user, seed_user_in, server, test_state};

const PASSWORD: &str = "Beton-30MPa!";

/// Anonymous sign-up with the default role.
async fn register(server: &TestServer, email: &str) -> Value {
    let response = server
        .post("/auth/register")
        .json(&json!({"email": email, "password": PASSWORD, "full_name": "Marie Tremblay"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

/// Sign-up performed by an administrator, who may pick the role.
async fn register_by(server: &TestServer, admin: &str, email: &str, role: &str) -> Value {
    let response = server
        .post("/auth/register")
        .authorization_bearer(admin)
        .json(&json!({
            "email": email,
            "password": PASSWORD,
            "full_name": "Marie Tremblay",
            "role": role
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn login(server: &TestServer, email: &str, password: &str) -> axum_test::TestResponse {
    server
        .post("/auth/login")
        .form(&[("username", email), ("password", password)])
        .await
}

// =========================================================================
// Registration
// =========================================================================

#[tokio::test]
async fn register_login_me_round_trip() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let server = server(&state);

    let user = register_by(&server, &admin, "marie@roady.ca", "chef_projet").await;
    assert_eq!(user["email"], "marie@roady.ca");
    assert_eq!(user["role"], "chef_projet");
    assert!(user.get("password_hash").is_none());

    let response = login(&server, "marie@roady.ca", PASSWORD).await;
    response.assert_status_ok();
    let tokens: Value = response.json();
    assert_eq!(tokens["token_type"], "bearer");
    assert_eq!(tokens["expires_in"], 30 * 60);

    let me: Value = server
        .get("/auth/me")
        .authorization_bearer(tokens["access_token"].as_str().unwrap())
        .await
        .json();
    assert_eq!(me["email"], "marie@roady.ca");
    assert!(me["scopes"].as_array().unwrap().contains(&json!("task:assign")));
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let state = test_state();
    let server = server(&state);
    register(&server, "dup@roady.ca").await;

    server
        .post("/auth/register")
        .json(&json!({"email": "DUP@roady.ca", "password": PASSWORD, "full_name": "Autre"}))
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn short_password_and_bad_email_are_422() {
    let state = test_state();
    let server = server(&state);

    let response = server
        .post("/auth/register")
        .json(&json!({"email": "pas-un-courriel", "password": "court", "full_name": "X"}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.text();
    assert!(body.contains("email"));
    assert!(body.contains("password"));
}

#[tokio::test]
async fn super_admin_cannot_self_register() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let server = server(&state);
    let root = json!({
        "email": "root@roady.ca",
        "password": PASSWORD,
        "full_name": "Root",
        "role": "super_admin"
    });

    server
        .post("/auth/register")
        .json(&root)
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .post("/auth/register")
        .authorization_bearer(&admin)
        .json(&root)
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn anonymous_sign_up_gets_default_role_without_company() {
    let state = test_state();
    let server = server(&state);

    let user = register(&server, "nouveau@roady.ca").await;
    assert_eq!(user["role"], "technicien");
    assert!(user["company_id"].is_null());
}

#[tokio::test]
async fn anonymous_caller_cannot_join_a_company_as_admin() {
    let state = test_state();
    state.lock_db().unwrap().create_company("acme", "Acme Construction").unwrap();
    let (_, owner) = seed_user_in(&state, UserRole::Admin, Some("acme"));
    let server = server(&state);
    let project: Value = server
        .post("/projects")
        .authorization_bearer(&owner)
        .json(&json!({"name": "Tour Acme"}))
        .await
        .json();

    for body in [
        json!({"email": "x@evil.io", "password": PASSWORD, "full_name": "X", "role": "admin", "company_id": "acme"}),
        json!({"email": "x@evil.io", "password": PASSWORD, "full_name": "X", "company_id": "acme"}),
        json!({"email": "x@evil.io", "password": PASSWORD, "full_name": "X", "role": "admin"}),
    ] {
        server
            .post("/auth/register")
            .json(&body)
            .expect_failure()
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
    assert!(state.lock_db().unwrap().find_user_by_email("x@evil.io").unwrap().is_none());

    // a plain sign-up lands outside the company and cannot touch its projects
    register(&server, "x@evil.io").await;
    let tokens: Value = login(&server, "x@evil.io", PASSWORD).await.json();
    server
        .delete(&format!("/projects/{}", project["id"].as_str().unwrap()))
        .authorization_bearer(tokens["access_token"].as_str().unwrap())
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_registers_into_own_company_only() {
    let state = test_state();
    {
        let db = state.lock_db().unwrap();
        db.create_company("acme", "Acme Construction").unwrap();
        db.create_company("rival", "Rival Inc").unwrap();
    }
    let (_, admin) = seed_user_in(&state, UserRole::Admin, Some("acme"));
    let (_, chef) = seed_user_in(&state, UserRole::ChefProjet, Some("acme"));
    let server = server(&state);

    let user = register_by(&server, &admin, "chef@acme.ca", "chef_projet").await;
    assert_eq!(user["company_id"], "acme");

    server
        .post("/auth/register")
        .authorization_bearer(&admin)
        .json(&json!({
            "email": "spy@rival.ca",
            "password": PASSWORD,
            "full_name": "Spy",
            "company_id": "rival"
        }))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // without admin:users the caller is treated like an anonymous sign-up
    server
        .post("/auth/register")
        .authorization_bearer(&chef)
        .json(&json!({"email": "aide@acme.ca", "password": PASSWORD, "full_name": "Aide", "role": "directeur"}))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

// =========================================================================
// Login and lockout
// =========================================================================

#[tokio::test]
async fn lockout_after_repeated_failures() {
    let state = test_state();
    let server = server(&state);
    register(&server, "lock@roady.ca").await;

    for _ in 0..5 {
        login(&server, "lock@roady.ca", "mauvais-mot")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // correct password is still refused while locked
    login(&server, "lock@roady.ca", PASSWORD)
        .await
        .assert_status(StatusCode::LOCKED);
}

#[tokio::test]
async fn successful_login_resets_failure_count() {
    let state = test_state();
    let server = server(&state);
    register(&server, "reset@roady.ca").await;

    for _ in 0..4 {
        login(&server, "reset@roady.ca", "mauvais-mot").await;
    }
    login(&server, "reset@roady.ca", PASSWORD).await.assert_status_ok();

    let user = state
        .lock_db()
        .unwrap()
        .find_user_by_email("reset@roady.ca")
        .unwrap()
        .unwrap();
    assert_eq!(user.failed_login_attempts, 0);
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn unknown_user_is_401() {
    let state = test_state();
    let server = server(&state);

    login(&server, "personne@roady.ca", PASSWORD)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn requested_scope_narrows_the_token() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let server = server(&state);
    register_by(&server, &admin, "scope@roady.ca", "directeur").await;

    let tokens: Value = server
        .post("/auth/login")
        .form(&[
            ("username", "scope@roady.ca"),
            ("password", PASSWORD),
            ("scope", "project:read finance:edit user:impersonate"),
        ])
        .await
        .json();

    let me: Value = server
        .get("/auth/me")
        .authorization_bearer(tokens["access_token"].as_str().unwrap())
        .await
        .json();
    assert_eq!(me["scopes"], json!(["project:read", "finance:edit"]));
}

// =========================================================================
// Token kinds
// =========================================================================

#[tokio::test]
async fn refresh_issues_a_new_pair() {
    let state = test_state();
    let server = server(&state);
    register(&server, "refresh@roady.ca").await;
    let tokens: Value = login(&server, "refresh@roady.ca", PASSWORD).await.json();

    let response = server
        .post("/auth/refresh")
        .json(&json!({"refresh_token": tokens["refresh_token"]}))
        .await;

    response.assert_status_ok();
    let fresh: Value = response.json();
    assert!(fresh["access_token"].as_str().is_some());
}

#[tokio::test]
async fn refresh_token_is_not_a_bearer() {
    let state = test_state();
    let server = server(&state);
    register(&server, "kind@roady.ca").await;
    let tokens: Value = login(&server, "kind@roady.ca", PASSWORD).await.json();

    server
        .get("/auth/me")
        .authorization_bearer(tokens["refresh_token"].as_str().unwrap())
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .post("/auth/refresh")
        .json(&json!({"refresh_token": tokens["access_token"]}))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_or_garbled_bearer_is_401() {
    let state = test_state();
    let server = server(&state);

    server.get("/auth/me").expect_failure().await.assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/auth/me")
        .authorization_bearer("not.a.jwt")
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deactivated_user_token_is_rejected() {
    let state = test_state();
    let (user, token) = seed_user(&state, UserRole::Technicien);
    state.lock_db().unwrap().set_user_active(&user.id, false).unwrap();
    let server = server(&state);

    server
        .get("/auth/me")
        .authorization_bearer(&token)
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

// =========================================================================
// Password change
// =========================================================================

#[tokio::test]
async fn change_password_requires_current_password() {
    let state = test_state();
    let server = server(&state);
    register(&server, "pw@roady.ca").await;
    let tokens: Value = login(&server, "pw@roady.ca", PASSWORD).await.json();
    let access = tokens["access_token"].as_str().unwrap();

    server
        .post("/auth/password/change")
        .authorization_bearer(access)
        .json(&json!({"current_password": "faux-faux-faux", "new_password": "Nouveau-2025!"}))
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/auth/password/change")
        .authorization_bearer(access)
        .json(&json!({"current_password": PASSWORD, "new_password": "Nouveau-2025!"}))
        .await
        .assert_status_ok();

    login(&server, "pw@roady.ca", "Nouveau-2025!").await.assert_status_ok();
    login(&server, "pw@roady.ca", PASSWORD)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
