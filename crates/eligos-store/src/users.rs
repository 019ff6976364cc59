use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use eligos_core::{Space, SpaceId, User, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, normalize_email, now_timestamp};

/// A user row including the password hash. Never leaves the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            id: UserId::from_raw(get::<String>(row, 0, "users", "id")?),
            name: get(row, 1, "users", "name")?,
            email: get(row, 2, "users", "email")?,
            password_hash: get(row, 3, "users", "password_hash")?,
            created_at: get(row, 4, "users", "created_at")?,
        })
    }

    pub fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            email: self.email,
        }
    }
}

const SELECT_USER: &str = "SELECT id, name, email, password_hash, created_at FROM users";

#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Emails are unique after normalization.
    #[instrument(skip(self, password_hash))]
    pub fn create(&self, name: &str, email: &str, password_hash: &str) -> Result<UserRow, StoreError> {
        let email = normalize_email(email);
        self.db.with_conn(|conn| {
            let id = UserId::new();
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO users (id, name, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), name, email, password_hash, now],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("email {email} already registered")),
                other => other,
            })?;

            Ok(UserRow {
                id,
                name: name.to_string(),
                email: email.clone(),
                password_hash: password_hash.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_USER} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => UserRow::from_row(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        let email = normalize_email(email);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_USER} WHERE email = ?1"))?;
            let mut rows = stmt.query([email.as_str()])?;
            rows.next()?.map(UserRow::from_row).transpose()
        })
    }

    /// Whether a user with this id exists.
    pub fn exists(&self, id: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id.as_str()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Spaces the user belongs to, oldest membership first.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn spaces_of(&self, id: &UserId) -> Result<Vec<Space>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name FROM spaces s
                 JOIN space_members m ON m.space_id = s.id
                 WHERE m.user_id = ?1
                 ORDER BY m.joined_at, s.id",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut spaces = Vec::new();
            while let Some(row) = rows.next()? {
                spaces.push(Space {
                    id: SpaceId::from_raw(get::<String>(row, 0, "spaces", "id")?),
                    name: get(row, 1, "spaces", "name")?,
                });
            }
            Ok(spaces)
        })
    }
}
