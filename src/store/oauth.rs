use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{now_str, parse_opt_ts, parse_ts, Store, StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthState {
    pub state: String,
    pub platform: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectedAccount {
    pub user_id: String,
    pub platform: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_url: Option<String>,
    pub connected_at: DateTime<Utc>,
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<ConnectedAccount> {
    Ok(ConnectedAccount {
        user_id: row.get(0)?,
        platform: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_at: parse_opt_ts(row.get(4)?)?,
        username: row.get(5)?,
        email: row.get(6)?,
        profile_url: row.get(7)?,
        connected_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

const ACCOUNT_COLUMNS: &str = "user_id, platform, access_token, refresh_token, expires_at, username, \
     email, profile_url, connected_at";

impl Store {
    /// Store a fresh state, dropping any older than `ttl` first.
    pub fn save_oauth_state(&self, state: &str, platform: &str, user_id: &str, ttl: Duration) -> StoreResult<()> {
        let cutoff = (Utc::now() - ttl).to_rfc3339();
        let purged = self
            .conn
            .execute("DELETE FROM oauth_states WHERE created_at < ?1", [&cutoff])?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired OAuth states");
        }
        self.conn.execute(
            "INSERT INTO oauth_states (state, platform, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![state, platform, user_id, now_str()],
        )?;
        Ok(())
    }

    /// States are single use: a lookup deletes the row. A state older than
    /// `ttl` is deleted and reported as missing.
    pub fn take_oauth_state(&self, state: &str, ttl: Duration) -> StoreResult<Option<OAuthState>> {
        let found = self
            .conn
            .query_row(
                "SELECT state, platform, user_id, created_at FROM oauth_states WHERE state = ?1",
                [state],
                |row| {
                    Ok(OAuthState {
                        state: row.get(0)?,
                        platform: row.get(1)?,
                        user_id: row.get(2)?,
                        created_at: parse_ts(&row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        let Some(found) = found else {
            return Ok(None);
        };
        self.conn.execute("DELETE FROM oauth_states WHERE state = ?1", [state])?;
        if Utc::now() - found.created_at > ttl {
            tracing::debug!(platform = %found.platform, "OAuth state expired");
            return Ok(None);
        }
        Ok(Some(found))
    }

    pub fn upsert_connected_account(&self, account: &ConnectedAccount) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO connected_accounts (user_id, platform, access_token, refresh_token, expires_at, \
             username, email, profile_url, connected_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(user_id, platform) DO UPDATE SET access_token = excluded.access_token, \
             refresh_token = COALESCE(excluded.refresh_token, connected_accounts.refresh_token), \
             expires_at = excluded.expires_at, \
             username = COALESCE(excluded.username, connected_accounts.username), \
             email = COALESCE(excluded.email, connected_accounts.email), \
             profile_url = COALESCE(excluded.profile_url, connected_accounts.profile_url)",
            params![
                account.user_id,
                account.platform,
                account.access_token,
                account.refresh_token,
                account.expires_at.map(|t| t.to_rfc3339()),
                account.username,
                account.email,
                account.profile_url,
                account.connected_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn connected_account(&self, user_id: &str, platform: &str) -> StoreResult<Option<ConnectedAccount>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM connected_accounts WHERE user_id = ?1 AND platform = ?2");
        Ok(self
            .conn
            .query_row(&sql, params![user_id, platform], row_to_account)
            .optional()?)
    }

    pub fn connected_accounts(&self, user_id: &str) -> StoreResult<Vec<ConnectedAccount>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM connected_accounts WHERE user_id = ?1 ORDER BY platform");
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([user_id], row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    pub fn delete_connected_account(&self, user_id: &str, platform: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM connected_accounts WHERE user_id = ?1 AND platform = ?2",
            params![user_id, platform],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("Connected account"));
        }
        Ok(())
    }
}
