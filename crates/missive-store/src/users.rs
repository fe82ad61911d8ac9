use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use missive_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::parse_timestamp;
use crate::models::{NewUser, User, UserProfile};

impl Database {
    /// Create an account, assigning its id and timestamps.
    ///
    /// Fails with [`StoreError::Conflict`] when the username or email is
    /// already taken.
    pub fn create_user(&self, new: NewUser) -> Result<User> {
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_online: false,
            last_seen: now,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.conn().execute(
            "INSERT INTO users (id, username, email, password_hash,
                                is_online, last_seen, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                user.is_online,
                user.last_seen.to_rfc3339(),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(user),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(
                    "Username or email already registered".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id, username, email, password_hash,
                        is_online, last_seen, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id, username, email, password_hash,
                        is_online, last_seen, created_at, updated_at
                 FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Every account except `id`, for the contact directory.
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, username, email, password_hash,
                    is_online, last_seen, created_at, updated_at
             FROM users
             WHERE id != ?1
             ORDER BY username",
        )?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(UserProfile::from(row?));
        }
        Ok(profiles)
    }

    /// Write the advisory presence flag and refresh `last_seen`.
    ///
    /// Absence of the row is not an error; the caller treats the whole
    /// operation as best-effort.
    pub fn set_online_status(&self, id: UserId, online: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "UPDATE users SET is_online = ?2, last_seen = ?3, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), online, now],
        )?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let email: String = row.get(2)?;
    let password_hash: String = row.get(3)?;
    let is_online: bool = row.get(4)?;
    let last_seen_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(User {
        id: UserId(id),
        username,
        email,
        password_hash,
        is_online,
        last_seen: parse_timestamp(&last_seen_str, 5)?,
        created_at: parse_timestamp(&created_str, 6)?,
        updated_at: parse_timestamp(&updated_str, 7)?,
    })
}
