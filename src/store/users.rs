use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{now_str, parse_enum, parse_opt_ts, parse_ts, Store, StoreError, StoreResult};
use crate::auth::UserRole;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub role: UserRole,
    pub company_id: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: &'a str,
    pub role: UserRole,
    pub company_id: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Criteria for picking notification recipients. Unset fields match everyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecipientFilter<'a> {
    pub company_id: Option<&'a str>,
    /// Narrows to the project's owner and task assignees.
    pub project_id: Option<&'a str>,
    pub role: Option<UserRole>,
}

const USER_COLUMNS: &str = "id, email, password_hash, full_name, role, company_id, phone, is_active, \
     failed_login_attempts, locked_until, last_login_at, created_at, updated_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        role: parse_enum(&row.get::<_, String>(4)?)?,
        company_id: row.get(5)?,
        phone: row.get(6)?,
        is_active: row.get(7)?,
        failed_login_attempts: row.get(8)?,
        locked_until: parse_opt_ts(row.get(9)?)?,
        last_login_at: parse_opt_ts(row.get(10)?)?,
        created_at: parse_ts(&row.get::<_, String>(11)?)?,
        updated_at: parse_ts(&row.get::<_, String>(12)?)?,
    })
}

impl Store {
    pub fn create_user(&self, new: &NewUser<'_>) -> StoreResult<User> {
        if self.find_user_by_email(new.email)?.is_some() {
            return Err(StoreError::Conflict("Email already registered".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_str();
        self.conn.execute(
            "INSERT INTO users (id, email, password_hash, full_name, role, company_id, phone, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                new.email.to_lowercase(),
                new.password_hash,
                new.full_name,
                new.role.as_str(),
                new.company_id,
                new.phone,
                now
            ],
        )?;
        self.get_user(&id)?.ok_or(StoreError::NotFound("User"))
    }

    pub fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_user).optional()?)
    }

    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        Ok(self.conn.query_row(&sql, [email], row_to_user).optional()?)
    }

    /// Count a failed password attempt, locking the account once the
    /// counter reaches `max_attempts`. Returns the updated user.
    pub fn record_failed_login(
        &self,
        id: &str,
        max_attempts: u32,
        lockout: Duration,
    ) -> StoreResult<User> {
        let user = self.get_user(id)?.ok_or(StoreError::NotFound("User"))?;
        let attempts = user.failed_login_attempts + 1;
        let now = Utc::now();
        let locked_until = (attempts >= max_attempts).then(|| (now + lockout).to_rfc3339());
        self.conn.execute(
            "UPDATE users SET failed_login_attempts = ?2, locked_until = COALESCE(?3, locked_until), \
             updated_at = ?4 WHERE id = ?1",
            params![id, attempts, locked_until, now.to_rfc3339()],
        )?;
        self.get_user(id)?.ok_or(StoreError::NotFound("User"))
    }

    pub fn record_successful_login(&self, id: &str) -> StoreResult<()> {
        let now = now_str();
        self.conn.execute(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login_at = ?2, \
             updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, password_hash, now_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    /// Ids of active users matching every criterion of `filter`.
    pub fn recipient_ids(&self, filter: &RecipientFilter<'_>) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM users WHERE is_active = 1 \
             AND (?1 IS NULL OR company_id = ?1) \
             AND (?2 IS NULL OR role = ?2) \
             AND (?3 IS NULL OR id IN ( \
                 SELECT owner_id FROM projects WHERE id = ?3 AND deleted_at IS NULL \
                 UNION SELECT assignee_id FROM tasks WHERE project_id = ?3 AND assignee_id IS NOT NULL)) \
             ORDER BY created_at, id",
        )?;
        let ids = stmt
            .query_map(
                params![filter.company_id, filter.role.map(|r| r.as_str()), filter.project_id],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn set_user_active(&self, id: &str, active: bool) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active, now_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user<'a>(email: &'a str) -> NewUser<'a> {
        NewUser {
            email,
            password_hash: "hash",
            full_name: "Marie Gagnon",
            role: UserRole::ChefProjet,
            company_id: None,
            phone: None,
        }
    }

    #[test]
    fn creates_and_fetches_user() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user(&new_user("marie@roady.ca")).unwrap();

        let fetched = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(fetched.email, "marie@roady.ca");
        assert_eq!(fetched.role, UserRole::ChefProjet);
        assert!(fetched.is_active);
        assert_eq!(fetched.failed_login_attempts, 0);
    }

    #[test]
    fn duplicate_email_conflicts_case_insensitively() {
        let store = Store::in_memory().unwrap();
        store.create_user(&new_user("marie@roady.ca")).unwrap();

        let err = store.create_user(&new_user("MARIE@roady.ca")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn locks_after_max_failed_attempts() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user(&new_user("a@b.ca")).unwrap();

        for _ in 0..4 {
            let u = store.record_failed_login(&user.id, 5, Duration::minutes(15)).unwrap();
            assert!(!u.is_locked(Utc::now()));
        }
        let u = store.record_failed_login(&user.id, 5, Duration::minutes(15)).unwrap();
        assert_eq!(u.failed_login_attempts, 5);
        assert!(u.is_locked(Utc::now()));
    }

    #[test]
    fn recipients_filter_by_company_role_and_activity() {
        let store = Store::in_memory().unwrap();
        store.create_company("acme", "Acme").unwrap();
        let make = |email: &str, role: UserRole, company: Option<&str>| {
            store
                .create_user(&NewUser { role, company_id: company, ..new_user(email) })
                .unwrap()
                .id
        };
        let chef = make("chef@acme.ca", UserRole::ChefProjet, Some("acme"));
        let tech = make("tech@acme.ca", UserRole::Technicien, Some("acme"));
        let away = make("away@acme.ca", UserRole::Technicien, Some("acme"));
        let solo = make("solo@gmail.com", UserRole::Technicien, None);
        store.set_user_active(&away, false).unwrap();

        let acme = RecipientFilter { company_id: Some("acme"), ..RecipientFilter::default() };
        let mut members = store.recipient_ids(&acme).unwrap();
        members.sort();
        let mut expected = vec![chef, tech.clone()];
        expected.sort();
        assert_eq!(members, expected);

        let techs = RecipientFilter { role: Some(UserRole::Technicien), ..acme };
        assert_eq!(store.recipient_ids(&techs).unwrap(), vec![tech.clone()]);

        let everyone = store.recipient_ids(&RecipientFilter::default()).unwrap();
        assert_eq!(everyone.len(), 3);
        assert!(everyone.contains(&solo));
    }

    #[test]
    fn successful_login_resets_counter() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user(&new_user("a@b.ca")).unwrap();
        store.record_failed_login(&user.id, 5, Duration::minutes(15)).unwrap();

        store.record_successful_login(&user.id).unwrap();

        let u = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(u.failed_login_attempts, 0);
        assert!(u.last_login_at.is_some());
    }
}
