use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::api::AppState;
use crate::auth::{CurrentUser, Permission, UserRole};
use crate::error::{AppError, AppJson, AppQuery, Validator};
use crate::notifications::{NotificationCreate, NotificationPayload, NotificationType};
use crate::store::{
    NewProject, NewTask, Project, ProjectFilter, ProjectPatch, ProjectStatus, Task, TaskPatch, TaskPriority,
    TaskStatus,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

fn cache_key(project_id: &str) -> String {
    format!("project:{project_id}")
}

/// Callers see their own company's projects; super admins see all.
fn visible_to(user: &CurrentUser, project: &Project) -> bool {
    user.user.role == UserRole::SuperAdmin || project.company_id == user.user.company_id
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Serialize)]
pub struct ProjectPage {
    pub items: Vec<Project>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub pages: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    #[serde(default)]
    pub budget_total: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
}

// ============================================================================
// Projects
// ============================================================================

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Json<ProjectPage>, AppError> {
    user.require(Permission::ProjectRead)?;

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(AppError::validation(
            "page_size",
            format!("must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }

    let scoped = user.user.role != UserRole::SuperAdmin;
    let filter = ProjectFilter {
        company_id: scoped.then(|| user.user.company_id.clone()).flatten(),
        without_company: scoped && user.user.company_id.is_none(),
        status: query.status,
        limit: page_size,
        offset: (page - 1).saturating_mul(page_size),
    };
    let (items, total) = {
        let db = state.lock_db()?;
        db.list_projects(&filter)?
    };

    Ok(Json(ProjectPage {
        items,
        total,
        page,
        page_size,
        pages: total.div_ceil(page_size as u64),
    }))
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require(Permission::ProjectCreate)?;
    Validator::new()
        .non_empty("name", &request.name)
        .non_negative("budget_total", request.budget_total)
        .finish()?;

    let project = {
        let db = state.lock_db()?;
        db.create_project(&NewProject {
            company_id: user.user.company_id.clone(),
            owner_id: user.id().to_string(),
            code: request.code,
            name: request.name.trim().to_string(),
            description: request.description,
            client_name: request.client_name,
            address: request.address,
            city: request.city,
            status: request.status,
            budget_total: request.budget_total.unwrap_or(0.0),
            start_date: request.start_date,
            end_date: request.end_date,
        })?
    };

    info!(project_id = %project.id, user = user.id(), "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// Cache-aside read shared by project and task handlers.
async fn load_project(state: &AppState, user: &CurrentUser, id: &str) -> Result<Project, AppError> {
    let key = cache_key(id);
    let project = match state.cache.get::<Project>(&key).await {
        Some(project) => project,
        None => {
            let project = {
                let db = state.lock_db()?;
                db.get_project(id)?
            }
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
            state.cache.set(&key, &project, None).await;
            project
        }
    };
    if !visible_to(user, &project) {
        return Err(AppError::NotFound("Project not found".to_string()));
    }
    Ok(project)
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    user.require(Permission::ProjectRead)?;
    Ok(Json(load_project(&state, &user, &id).await?))
}

pub async fn update_project(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(patch): AppJson<ProjectPatch>,
) -> Result<Json<Project>, AppError> {
    user.require(Permission::ProjectUpdate)?;
    let mut validator = Validator::new();
    if let Some(name) = &patch.name {
        validator.non_empty("name", name);
    }
    validator
        .percent("progress_percent", patch.progress_percent)
        .non_negative("budget_total", patch.budget_total)
        .non_negative("budget_spent", patch.budget_spent)
        .finish()?;

    load_project(&state, &user, &id).await?;
    let project = {
        let db = state.lock_db()?;
        db.update_project(&id, &patch)?
    };
    state.cache.delete(&cache_key(&id)).await;

    info!(project_id = %id, user = user.id(), "Project updated");
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    user.require(Permission::ProjectDelete)?;
    load_project(&state, &user, &id).await?;
    {
        let db = state.lock_db()?;
        db.soft_delete_project(&id)?;
    }
    state.cache.delete(&cache_key(&id)).await;

    info!(project_id = %id, user = user.id(), "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tasks
// ============================================================================

/// Assignees must be active members of the project's company. Super admins
/// may assign across companies. Foreign users read as unknown.
async fn check_assignee(
    state: &AppState,
    user: &CurrentUser,
    project: &Project,
    assignee_id: &str,
) -> Result<(), AppError> {
    user.require(Permission::TaskAssign)?;
    let cross_company = user.user.role == UserRole::SuperAdmin;
    let eligible = {
        let db = state.lock_db()?;
        db.get_user(assignee_id)?
            .is_some_and(|u| u.is_active && (cross_company || u.company_id == project.company_id))
    };
    if !eligible {
        return Err(AppError::validation("assignee_id", "unknown user"));
    }
    Ok(())
}

async fn notify_assignee(state: &AppState, assigner: &CurrentUser, task: &Task, project: &Project) {
    let Some(assignee) = task.assignee_id.clone() else {
        return;
    };
    let data = HashMap::from([
        ("task_id".to_string(), serde_json::json!(task.id)),
        ("project_id".to_string(), serde_json::json!(project.id)),
        ("assigned_by".to_string(), serde_json::json!(assigner.id())),
    ]);
    let request = NotificationCreate {
        recipient_ids: vec![assignee],
        payload: NotificationPayload {
            kind: NotificationType::TaskAssigned,
            title: "Nouvelle tâche assignée".to_string(),
            body: format!("{} ({})", task.title, project.name),
            data,
            image_url: None,
            action_url: Some(format!("/tasks/{}", task.id)),
        },
        priority: None,
        channels: None,
    };
    state.notifier.send(&request).await;
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<CreateTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require(Permission::TaskCreate)?;
    Validator::new()
        .non_empty("title", &request.title)
        .non_negative("estimated_hours", request.estimated_hours)
        .finish()?;

    let project = load_project(&state, &user, &request.project_id).await?;
    if let Some(assignee) = &request.assignee_id {
        check_assignee(&state, &user, &project, assignee).await?;
    }

    let task = {
        let db = state.lock_db()?;
        db.create_task(&NewTask {
            project_id: project.id.clone(),
            title: request.title.trim().to_string(),
            description: request.description,
            status: request.status.unwrap_or(TaskStatus::Todo),
            priority: request.priority.unwrap_or(TaskPriority::Medium),
            assignee_id: request.assignee_id,
            created_by: user.id().to_string(),
            due_date: request.due_date,
            estimated_hours: request.estimated_hours,
        })?
    };
    notify_assignee(&state, &user, &task, &project).await;

    info!(task_id = %task.id, project_id = %project.id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn load_task(state: &AppState, user: &CurrentUser, id: &str) -> Result<(Task, Project), AppError> {
    let task = {
        let db = state.lock_db()?;
        db.get_task(id)?
    }
    .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;
    // tasks of a deleted or foreign project are hidden with it
    let project = load_project(state, user, &task.project_id)
        .await
        .map_err(|_| AppError::NotFound("Task not found".to_string()))?;
    Ok((task, project))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    user.require(Permission::TaskRead)?;
    let (task, _) = load_task(&state, &user, &id).await?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(patch): AppJson<TaskPatch>,
) -> Result<Json<Task>, AppError> {
    user.require(Permission::TaskUpdate)?;
    let mut validator = Validator::new();
    if let Some(title) = &patch.title {
        validator.non_empty("title", title);
    }
    validator
        .percent("progress_percent", patch.progress_percent)
        .non_negative("estimated_hours", patch.estimated_hours)
        .finish()?;

    let (current, project) = load_task(&state, &user, &id).await?;
    let reassigned = patch
        .assignee_id
        .as_ref()
        .filter(|new| current.assignee_id.as_ref() != Some(*new));
    if let Some(assignee) = reassigned {
        check_assignee(&state, &user, &project, assignee).await?;
    }
    let reassigned = reassigned.is_some();

    let task = {
        let db = state.lock_db()?;
        db.update_task(&id, &patch)?
    };
    if reassigned {
        notify_assignee(&state, &user, &task, &project).await;
    }

    info!(task_id = %id, status = %task.status, "Task updated");
    Ok(Json(task))
}

pub async fn list_project_tasks(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Task>>, AppError> {
    user.require(Permission::TaskRead)?;
    load_project(&state, &user, &id).await?;
    let tasks = {
        let db = state.lock_db()?;
        db.list_project_tasks(&id)?
    };
    Ok(Json(tasks))
}
