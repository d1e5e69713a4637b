use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{now_str, parse_enum, parse_opt_ts, parse_ts, Store, StoreError, StoreResult};
use crate::notifications::{DevicePlatform, NotificationPriority, NotificationType};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub priority: NotificationPriority,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: NotificationType,
    pub title: &'a str,
    pub body: &'a str,
    pub data: &'a serde_json::Value,
    pub action_url: Option<&'a str>,
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceToken {
    pub token: String,
    pub user_id: String,
    pub platform: DevicePlatform,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, title, body, data, action_url, priority, is_read, read_at, created_at";

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let data: String = row.get(5)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: parse_enum(&row.get::<_, String>(2)?)?,
        title: row.get(3)?,
        body: row.get(4)?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        action_url: row.get(6)?,
        priority: parse_enum(&row.get::<_, String>(7)?)?,
        is_read: row.get(8)?,
        read_at: parse_opt_ts(row.get(9)?)?,
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

impl Store {
    pub fn insert_notification(&self, new: &NewNotification<'_>) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO notifications (id, user_id, type, title, body, data, action_url, priority, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.user_id,
                new.kind.as_str(),
                new.title,
                new.body,
                new.data.to_string(),
                new.action_url,
                new.priority.as_str(),
                now_str()
            ],
        )?;
        Ok(id)
    }

    pub fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<NotificationRecord>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0) \
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![user_id, unread_only, limit, offset], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn unread_count(&self, user_id: &str) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Scoped to the owner so one user cannot acknowledge another's notification.
    pub fn mark_notification_read(&self, user_id: &str, id: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?3) \
             WHERE id = ?1 AND user_id = ?2",
            params![id, user_id, now_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("Notification"));
        }
        Ok(())
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> StoreResult<usize> {
        Ok(self.conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE user_id = ?1 AND is_read = 0",
            params![user_id, now_str()],
        )?)
    }

    /// Re-registering a token moves it to the new user.
    pub fn save_device_token(
        &self,
        user_id: &str,
        token: &str,
        platform: DevicePlatform,
        device_name: Option<&str>,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO device_tokens (token, user_id, platform, device_name, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, \
             platform = excluded.platform, device_name = excluded.device_name",
            params![token, user_id, platform.as_str(), device_name, now_str()],
        )?;
        Ok(())
    }

    pub fn delete_device_token(&self, user_id: &str, token: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM device_tokens WHERE token = ?1 AND user_id = ?2",
            params![token, user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("Device"));
        }
        Ok(())
    }

    pub fn device_tokens_for(&self, user_ids: &[String]) -> StoreResult<Vec<DeviceToken>> {
        let mut stmt = self.conn.prepare(
            "SELECT token, user_id, platform, device_name, created_at FROM device_tokens WHERE user_id = ?1",
        )?;
        let mut tokens = Vec::new();
        for user_id in user_ids {
            let rows = stmt.query_map([user_id], |row| {
                Ok(DeviceToken {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: parse_enum(&row.get::<_, String>(2)?)?,
                    device_name: row.get(3)?,
                    created_at: parse_ts(&row.get::<_, String>(4)?)?,
                })
            })?;
            for row in rows {
                tokens.push(row?);
            }
        }
        Ok(tokens)
    }
}
