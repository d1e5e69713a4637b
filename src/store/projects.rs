use chrono::{DateTime, Utc};
use rusqlite::{params, types::Value, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_str, parse_enum, parse_ts, Store, StoreError, StoreResult};

string_enum! {
    pub enum ProjectStatus {
        Draft => "draft",
        Planning => "planning",
        Active => "active",
        OnHold => "on_hold",
        Completed => "completed",
        Cancelled => "cancelled",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub company_id: Option<String>,
    pub owner_id: String,
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub status: ProjectStatus,
    pub budget_total: f64,
    pub budget_spent: f64,
    pub progress_percent: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub company_id: Option<String>,
    pub owner_id: String,
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub status: Option<ProjectStatus>,
    pub budget_total: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Partial update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub status: Option<ProjectStatus>,
    pub budget_total: Option<f64>,
    pub budget_spent: Option<f64>,
    pub progress_percent: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub company_id: Option<String>,
    /// Only projects with no company. Ignored when `company_id` is set.
    pub without_company: bool,
    pub status: Option<ProjectStatus>,
    pub limit: u32,
    pub offset: u32,
}

const PROJECT_COLUMNS: &str = "id, company_id, owner_id, code, name, description, client_name, \
     address, city, status, budget_total, budget_spent, progress_percent, start_date, end_date, \
     created_at, updated_at";

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        company_id: row.get(1)?,
        owner_id: row.get(2)?,
        code: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        client_name: row.get(6)?,
        address: row.get(7)?,
        city: row.get(8)?,
        status: parse_enum(&row.get::<_, String>(9)?)?,
        budget_total: row.get(10)?,
        budget_spent: row.get(11)?,
        progress_percent: row.get(12)?,
        start_date: row.get(13)?,
        end_date: row.get(14)?,
        created_at: parse_ts(&row.get::<_, String>(15)?)?,
        updated_at: parse_ts(&row.get::<_, String>(16)?)?,
    })
}

impl Store {
    pub fn create_project(&self, new: &NewProject) -> StoreResult<Project> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_str();
        let status = new.status.unwrap_or(ProjectStatus::Draft);
        self.conn.execute(
            "INSERT INTO projects (id, company_id, owner_id, code, name, description, client_name, \
             address, city, status, budget_total, start_date, end_date, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                id,
                new.company_id,
                new.owner_id,
                new.code,
                new.name,
                new.description,
                new.client_name,
                new.address,
                new.city,
                status.as_str(),
                new.budget_total,
                new.start_date,
                new.end_date,
                now
            ],
        )?;
        self.get_project(&id)?.ok_or(StoreError::NotFound("Project"))
    }

    /// Soft-deleted projects are never returned.
    pub fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1 AND deleted_at IS NULL");
        Ok(self.conn.query_row(&sql, [id], row_to_project).optional()?)
    }

    /// Returns the page and the total count matching the filter.
    pub fn list_projects(&self, filter: &ProjectFilter) -> StoreResult<(Vec<Project>, u64)> {
        let mut clauses = vec!["deleted_at IS NULL".to_string()];
        let mut args: Vec<Value> = Vec::new();
        if let Some(company) = &filter.company_id {
            args.push(Value::Text(company.clone()));
            clauses.push(format!("company_id = ?{}", args.len()));
        } else if filter.without_company {
            clauses.push("company_id IS NULL".to_string());
        }
        if let Some(status) = filter.status {
            args.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        let where_sql = clauses.join(" AND ");

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM projects WHERE {where_sql}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Value::Integer(filter.limit as i64));
        let limit_idx = args.len();
        args.push(Value::Integer(filter.offset as i64));
        let offset_idx = args.len();
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE {where_sql} \
             ORDER BY created_at DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let projects = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((projects, total.max(0) as u64))
    }

    pub fn update_project(&self, id: &str, patch: &ProjectPatch) -> StoreResult<Project> {
        let current = self.get_project(id)?.ok_or(StoreError::NotFound("Project"))?;
        let status = patch.status.unwrap_or(current.status);
        self.conn.execute(
            "UPDATE projects SET code = ?2, name = ?3, description = ?4, client_name = ?5, \
             address = ?6, city = ?7, status = ?8, budget_total = ?9, budget_spent = ?10, \
             progress_percent = ?11, start_date = ?12, end_date = ?13, updated_at = ?14 \
             WHERE id = ?1 AND deleted_at IS NULL",
            params![
                id,
                patch.code.clone().or(current.code),
                patch.name.clone().unwrap_or(current.name),
                patch.description.clone().or(current.description),
                patch.client_name.clone().or(current.client_name),
                patch.address.clone().or(current.address),
                patch.city.clone().or(current.city),
                status.as_str(),
                patch.budget_total.unwrap_or(current.budget_total),
                patch.budget_spent.unwrap_or(current.budget_spent),
                patch.progress_percent.unwrap_or(current.progress_percent),
                patch.start_date.clone().or(current.start_date),
                patch.end_date.clone().or(current.end_date),
                now_str()
            ],
        )?;
        self.get_project(id)?.ok_or(StoreError::NotFound("Project"))
    }

    pub fn soft_delete_project(&self, id: &str) -> StoreResult<()> {
        let now = now_str();
        let changed = self.conn.execute(
            "UPDATE projects SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("Project"));
        }
        Ok(())
    }
}
