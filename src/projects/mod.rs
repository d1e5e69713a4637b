//! Construction projects and their tasks.
//!
//! Endpoints:
//! - GET /projects - Paginated list, optional `status` filter
//! - POST /projects - Create
//! - GET /projects/{id} - Read through the cache
//! - PATCH /projects/{id} - Partial update
//! - DELETE /projects/{id} - Soft delete
//! - GET /projects/{id}/tasks - Tasks of a project
//! - POST /tasks - Create a task
//! - GET /tasks/{id} - Read a task
//! - PATCH /tasks/{id} - Update, reassign or complete a task

mod handlers;
#[cfg(test)]
mod tests;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use handlers::{ProjectPage, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", get(handlers::list_projects).post(handlers::create_project))
        .route(
            "/projects/{id}",
            get(handlers::get_project)
                .patch(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/projects/{id}/tasks", get(handlers::list_project_tasks))
        .route("/tasks", post(handlers::create_task))
        .route("/tasks/{id}", get(handlers::get_task).patch(handlers::update_task))
}
