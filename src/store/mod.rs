//! SQLite-backed persistence.
//!
//! One [`Store`] wraps a single connection; each entity family adds its own
//! `impl Store` block in a submodule. Timestamps are RFC 3339 text.

mod billing;
mod notifications;
mod oauth;
mod projects;
mod tasks;
mod users;

pub use billing::{Invoice, Subscription};
pub use notifications::{DeviceToken, NewNotification, NotificationRecord};
pub use oauth::{ConnectedAccount, OAuthState};
pub use projects::{NewProject, Project, ProjectFilter, ProjectPatch, ProjectStatus};
pub use tasks::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
pub use users::{NewUser, RecipientFilter, User};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database file, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { conn: Connection::open(path)? };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                full_name TEXT NOT NULL,
                role TEXT NOT NULL,
                company_id TEXT,
                phone TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                failed_login_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT,
                last_login_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                company_id TEXT,
                owner_id TEXT NOT NULL REFERENCES users(id),
                code TEXT,
                name TEXT NOT NULL,
                description TEXT,
                client_name TEXT,
                address TEXT,
                city TEXT,
                status TEXT NOT NULL CHECK (status IN
                    ('draft', 'planning', 'active', 'on_hold', 'completed', 'cancelled', 'archived')),
                budget_total REAL NOT NULL DEFAULT 0,
                budget_spent REAL NOT NULL DEFAULT 0,
                progress_percent REAL NOT NULL DEFAULT 0,
                start_date TEXT,
                end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL CHECK (status IN
                    ('backlog', 'todo', 'in_progress', 'review', 'completed', 'cancelled')),
                priority TEXT NOT NULL CHECK (priority IN
                    ('low', 'medium', 'high', 'urgent', 'critical')),
                assignee_id TEXT REFERENCES users(id),
                created_by TEXT NOT NULL REFERENCES users(id),
                due_date TEXT,
                estimated_hours REAL,
                progress_percent REAL NOT NULL DEFAULT 0,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                action_url TEXT,
                priority TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                read_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS device_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL CHECK (platform IN ('ios', 'android', 'web')),
                device_name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS billing_customers (
                company_id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                plan_tier TEXT NOT NULL,
                billing_interval TEXT NOT NULL,
                status TEXT NOT NULL,
                current_period_start TEXT,
                current_period_end TEXT,
                cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
                trial_end TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                amount_subtotal REAL NOT NULL,
                amount_tax REAL NOT NULL,
                amount_total REAL NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                invoice_pdf TEXT,
                created_at TEXT NOT NULL,
                paid_at TEXT
            );

            CREATE TABLE IF NOT EXISTS oauth_states (
                state TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_oauth_states_created ON oauth_states(created_at);

            CREATE TABLE IF NOT EXISTS connected_accounts (
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                username TEXT,
                email TEXT,
                profile_url TEXT,
                connected_at TEXT NOT NULL,
                PRIMARY KEY (user_id, platform)
            );

            CREATE INDEX IF NOT EXISTS idx_projects_company ON projects(company_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
            CREATE INDEX IF NOT EXISTS idx_devices_user ON device_tokens(user_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_company ON subscriptions(company_id);
            CREATE INDEX IF NOT EXISTS idx_invoices_company ON invoices(company_id);
            "#,
        )?;
        Ok(())
    }

    /// Cheap round trip used by the readiness check.
    pub fn ping(&self) -> StoreResult<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn create_company(&self, id: &str, name: &str) -> StoreResult<()> {
        let now = now_str();
        self.conn.execute(
            "INSERT INTO companies (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            [id, name, &now],
        )?;
        Ok(())
    }

    pub fn company_name(&self, id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT name FROM companies WHERE id = ?1", [id], |row| row.get(0))
            .optional()?)
    }
}

pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

/// Parse an enum column through its `FromStr` impl.
pub(crate) fn parse_enum<T>(value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::from(e))
    })
}
