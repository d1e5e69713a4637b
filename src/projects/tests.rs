//! Endpoint tests for projects and tasks.

use axum::http::StatusCode;
use axum_test::TestServer;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::auth::UserRole;
use crate::testing::{seed_user, seed_user_in, server, test_state};

async fn create_project(server: &TestServer, token: &str, name: &str) -> Value {
    let response = server
        .post("/projects")
        .authorization_bearer(token)
        .json(&json!({"name": name, "budget_total": 1_200_000.0, "city": "Québec"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

// =========================================================================
// Projects
// =========================================================================

#[tokio::test]
async fn create_and_fetch_project() {
    let state = test_state();
    let (owner, token) = seed_user(&state, UserRole::Directeur);
    let server = server(&state);

    let created = create_project(&server, &token, "Complexe Sainte-Foy").await;
    assert_eq!(created["status"], "draft");
    assert_eq!(created["owner_id"], owner.id.as_str());

    let id = created["id"].as_str().unwrap();
    let fetched: Value = server
        .get(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(fetched["name"], "Complexe Sainte-Foy");
    assert_eq!(fetched["budget_total"], 1_200_000.0);
}

#[tokio::test]
async fn client_cannot_create_projects() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::Client);
    let server = server(&state);

    let response = server
        .post("/projects")
        .authorization_bearer(&token)
        .json(&json!({"name": "Interdit"}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("project:create"));
}

#[tokio::test]
async fn invalid_project_fields_are_422() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::Admin);
    let server = server(&state);

    let response = server
        .post("/projects")
        .authorization_bearer(&token)
        .json(&json!({"name": "  ", "budget_total": -5.0}))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "budget_total"]);
}

#[tokio::test]
async fn patch_invalidates_cached_copy() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::Admin);
    let server = server(&state);
    let id = create_project(&server, &token, "Pont Lévis").await["id"]
        .as_str()
        .unwrap()
        .to_string();

    // warm the cache
    server.get(&format!("/projects/{id}")).authorization_bearer(&token).await;
    assert!(state.cache.l1_contains(&format!("project:{id}")).await);

    let updated: Value = server
        .patch(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .json(&json!({"status": "active", "progress_percent": 35.0}))
        .await
        .json();
    assert_eq!(updated["status"], "active");
    assert!(!state.cache.l1_contains(&format!("project:{id}")).await);

    let fetched: Value = server
        .get(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(fetched["progress_percent"], 35.0);
    assert_eq!(fetched["city"], "Québec");
}

#[tokio::test]
async fn progress_over_100_is_rejected() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::Admin);
    let server = server(&state);
    let id = create_project(&server, &token, "Aréna").await["id"].as_str().unwrap().to_string();

    server
        .patch(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .json(&json!({"progress_percent": 140.0}))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn deleted_project_is_gone() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::Admin);
    let server = server(&state);
    let id = create_project(&server, &token, "Temporaire").await["id"]
        .as_str()
        .unwrap()
        .to_string();
    server.get(&format!("/projects/{id}")).authorization_bearer(&token).await;

    server
        .delete(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    server
        .get(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .patch(&format!("/projects/{id}"))
        .authorization_bearer(&token)
        .json(&json!({"name": "Revenant"}))
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_is_paginated_and_scoped_to_company() {
    let state = test_state();
    {
        let db = state.lock_db().unwrap();
        db.create_company("acme", "Acme Construction").unwrap();
        db.create_company("rival", "Rival Inc").unwrap();
    }
    let (_, acme) = seed_user_in(&state, UserRole::Admin, Some("acme"));
    let (_, rival) = seed_user_in(&state, UserRole::Admin, Some("rival"));
    let server = server(&state);
    for i in 0..3 {
        create_project(&server, &acme, &format!("Acme {i}")).await;
    }
    let foreign = create_project(&server, &rival, "Rival 0").await;

    let page: Value = server
        .get("/projects")
        .authorization_bearer(&acme)
        .add_query_param("page", 2)
        .add_query_param("page_size", 2)
        .await
        .json();
    assert_eq!(page["total"], 3);
    assert_eq!(page["pages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    server
        .get(&format!("/projects/{}", foreign["id"].as_str().unwrap()))
        .authorization_bearer(&acme)
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .get("/projects")
        .authorization_bearer(&acme)
        .add_query_param("page_size", 500)
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

// =========================================================================
// Tasks
// =========================================================================

#[tokio::test]
async fn task_needs_existing_project() {
    let state = test_state();
    let (_, token) = seed_user(&state, UserRole::ChefProjet);
    let server = server(&state);

    server
        .post("/tasks")
        .authorization_bearer(&token)
        .json(&json!({"project_id": "absent", "title": "Coffrage"}))
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn assigning_a_task_notifies_the_assignee() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let (_, chef) = seed_user(&state, UserRole::ChefProjet);
    let (worker, _) = seed_user(&state, UserRole::Technicien);
    let server = server(&state);
    let project = create_project(&server, &admin, "Usine Drummondville").await;

    let task: Value = server
        .post("/tasks")
        .authorization_bearer(&chef)
        .json(&json!({"project_id": project["id"], "title": "Coulée de la dalle", "priority": "high"}))
        .await
        .json();
    assert_eq!(task["status"], "todo");

    let updated: Value = server
        .patch(&format!("/tasks/{}", task["id"].as_str().unwrap()))
        .authorization_bearer(&chef)
        .json(&json!({"assignee_id": worker.id}))
        .await
        .json();
    assert_eq!(updated["assignee_id"], worker.id.as_str());

    let db = state.lock_db().unwrap();
    assert_eq!(db.unread_count(&worker.id).unwrap(), 1);
    let notes = db.list_notifications(&worker.id, false, 10, 0).unwrap();
    assert_eq!(notes[0].kind.as_str(), "task_assigned");
}

#[tokio::test]
async fn reassignment_requires_task_assign() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let (_, tech) = seed_user(&state, UserRole::Technicien);
    let (other, _) = seed_user(&state, UserRole::Technicien);
    let server = server(&state);
    let project = create_project(&server, &admin, "Garage").await;
    let task: Value = server
        .post("/tasks")
        .authorization_bearer(&admin)
        .json(&json!({"project_id": project["id"], "title": "Électricité"}))
        .await
        .json();

    server
        .patch(&format!("/tasks/{}", task["id"].as_str().unwrap()))
        .authorization_bearer(&tech)
        .json(&json!({"assignee_id": other.id}))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn assignee_must_belong_to_the_project_company() {
    let state = test_state();
    {
        let db = state.lock_db().unwrap();
        db.create_company("acme", "Acme Construction").unwrap();
        db.create_company("rival", "Rival Inc").unwrap();
    }
    let (_, admin) = seed_user_in(&state, UserRole::Admin, Some("acme"));
    let (colleague, _) = seed_user_in(&state, UserRole::Technicien, Some("acme"));
    let (outsider, _) = seed_user_in(&state, UserRole::Technicien, Some("rival"));
    let (_, root) = seed_user(&state, UserRole::SuperAdmin);
    let server = server(&state);
    let project = create_project(&server, &admin, "Pont Champlain").await;

    let response = server
        .post("/tasks")
        .authorization_bearer(&admin)
        .json(&json!({"project_id": project["id"], "title": "Ancrage", "assignee_id": outsider.id}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.text().contains("assignee_id"));
    assert_eq!(state.lock_db().unwrap().unread_count(&outsider.id).unwrap(), 0);

    let task: Value = server
        .post("/tasks")
        .authorization_bearer(&admin)
        .json(&json!({"project_id": project["id"], "title": "Ancrage", "assignee_id": colleague.id}))
        .await
        .json();
    let task_path = format!("/tasks/{}", task["id"].as_str().unwrap());

    server
        .patch(&task_path)
        .authorization_bearer(&admin)
        .json(&json!({"assignee_id": outsider.id}))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let moved: Value = server
        .patch(&task_path)
        .authorization_bearer(&root)
        .json(&json!({"assignee_id": outsider.id}))
        .await
        .json();
    assert_eq!(moved["assignee_id"], outsider.id.as_str());
}

#[tokio::test]
async fn completing_a_task_stamps_completion() {
    let state = test_state();
    let (_, admin) = seed_user(&state, UserRole::Admin);
    let (_, tech) = seed_user(&state, UserRole::Technicien);
    let server = server(&state);
    let project = create_project(&server, &admin, "Toiture").await;
    let task: Value = server
        .post("/tasks")
        .authorization_bearer(&admin)
        .json(&json!({"project_id": project["id"], "title": "Membrane"}))
        .await
        .json();
    let task_id = task["id"].as_str().unwrap();

    let done: Value = server
        .patch(&format!("/tasks/{task_id}"))
        .authorization_bearer(&tech)
        .json(&json!({"status": "completed"}))
        .await
        .json();
    assert_eq!(done["status"], "completed");
    assert_eq!(done["progress_percent"], 100.0);
    assert!(done["completed_at"].is_string());

    let tasks: Value = server
        .get(&format!("/projects/{}/tasks", project["id"].as_str().unwrap()))
        .authorization_bearer(&tech)
        .await
        .json();
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}
