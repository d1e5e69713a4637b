use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_str, parse_enum, parse_opt_ts, parse_ts, Store, StoreError, StoreResult};

string_enum! {
    pub enum TaskStatus {
        Backlog => "backlog",
        Todo => "todo",
        InProgress => "in_progress",
        Review => "review",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum TaskPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
        Critical => "critical",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub progress_percent: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<String>,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub progress_percent: Option<f64>,
}

const TASK_COLUMNS: &str = "id, project_id, title, description, status, priority, assignee_id, \
     created_by, due_date, estimated_hours, progress_percent, completed_at, created_at, updated_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_enum(&row.get::<_, String>(4)?)?,
        priority: parse_enum(&row.get::<_, String>(5)?)?,
        assignee_id: row.get(6)?,
        created_by: row.get(7)?,
        due_date: row.get(8)?,
        estimated_hours: row.get(9)?,
        progress_percent: row.get(10)?,
        completed_at: parse_opt_ts(row.get(11)?)?,
        created_at: parse_ts(&row.get::<_, String>(12)?)?,
        updated_at: parse_ts(&row.get::<_, String>(13)?)?,
    })
}

impl Store {
    /// The parent project must exist and not be soft-deleted.
    pub fn create_task(&self, new: &NewTask) -> StoreResult<Task> {
        if self.get_project(&new.project_id)?.is_none() {
            return Err(StoreError::NotFound("Project"));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_str();
        let completed_at = (new.status == TaskStatus::Completed).then(|| now.clone());
        self.conn.execute(
            "INSERT INTO tasks (id, project_id, title, description, status, priority, assignee_id, \
             created_by, due_date, estimated_hours, completed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                id,
                new.project_id,
                new.title,
                new.description,
                new.status.as_str(),
                new.priority.as_str(),
                new.assignee_id,
                new.created_by,
                new.due_date,
                new.estimated_hours,
                completed_at,
                now
            ],
        )?;
        self.get_task(&id)?.ok_or(StoreError::NotFound("Task"))
    }

    pub fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_task).optional()?)
    }

    pub fn list_project_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY created_at");
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map([project_id], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Moving into `completed` stamps `completed_at`; moving out clears it.
    pub fn update_task(&self, id: &str, patch: &TaskPatch) -> StoreResult<Task> {
        let current = self.get_task(id)?.ok_or(StoreError::NotFound("Task"))?;
        let status = patch.status.unwrap_or(current.status);
        let completed_at = match (current.status, status) {
            (TaskStatus::Completed, TaskStatus::Completed) => current.completed_at.map(|t| t.to_rfc3339()),
            (_, TaskStatus::Completed) => Some(now_str()),
            _ => None,
        };
        let progress = if status == TaskStatus::Completed {
            100.0
        } else {
            patch.progress_percent.unwrap_or(current.progress_percent)
        };
        self.conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5, \
             assignee_id = ?6, due_date = ?7, estimated_hours = ?8, progress_percent = ?9, \
             completed_at = ?10, updated_at = ?11 WHERE id = ?1",
            params![
                id,
                patch.title.clone().unwrap_or(current.title),
                patch.description.clone().or(current.description),
                status.as_str(),
                patch.priority.unwrap_or(current.priority).as_str(),
                patch.assignee_id.clone().or(current.assignee_id),
                patch.due_date.clone().or(current.due_date),
                patch.estimated_hours.or(current.estimated_hours),
                progress,
                completed_at,
                now_str()
            ],
        )?;
        self.get_task(id)?.ok_or(StoreError::NotFound("Task"))
    }
}
