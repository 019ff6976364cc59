use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use eligos_core::{MembershipResolver, ServiceError, Space, SpaceId, User, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, now_timestamp};

#[derive(Clone)]
pub struct SpaceRepo {
    db: Database,
}

fn space_exists(conn: &Connection, id: &SpaceId) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM spaces WHERE id = ?1", [id.as_str()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn user_exists(conn: &Connection, id: &UserId) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id.as_str()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

impl SpaceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a space; `owner` becomes its first member in the same transaction.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn create(&self, name: &str, owner: &UserId) -> Result<Space, StoreError> {
        self.db.with_tx(|tx| {
            if !user_exists(tx, owner)? {
                return Err(StoreError::NotFound(format!("user {owner}")));
            }

            let id = SpaceId::new();
            let now = now_timestamp();
            tx.execute(
                "INSERT INTO spaces (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), name, now],
            )?;
            tx.execute(
                "INSERT INTO space_members (user_id, space_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![owner.as_str(), id.as_str(), now],
            )?;

            Ok(Space {
                id,
                name: name.to_string(),
            })
        })
    }

    #[instrument(skip(self), fields(space_id = %id))]
    pub fn get(&self, id: &SpaceId) -> Result<Space, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM spaces WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Space {
                    id: SpaceId::from_raw(get::<String>(row, 0, "spaces", "id")?),
                    name: get(row, 1, "spaces", "name")?,
                }),
                None => Err(StoreError::NotFound(format!("space {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &SpaceId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| space_exists(conn, id))
    }

    /// Add `user` to `space`.
    ///
    /// NotFound if either side is unknown, Conflict if already a member.
    #[instrument(skip(self), fields(space_id = %space, user_id = %user))]
    pub fn add_member(&self, space: &SpaceId, user: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            if !space_exists(conn, space)? {
                return Err(StoreError::NotFound(format!("space {space}")));
            }
            if !user_exists(conn, user)? {
                return Err(StoreError::NotFound(format!("user {user}")));
            }
            conn.execute(
                "INSERT INTO space_members (user_id, space_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user.as_str(), space.as_str(), now_timestamp()],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("user {user} already in space {space}"))
                }
                other => other,
            })?;
            Ok(())
        })
    }

    /// Remove a membership. Returns whether a row was removed.
    #[instrument(skip(self), fields(space_id = %space, user_id = %user))]
    pub fn remove_member(&self, space: &SpaceId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM space_members WHERE user_id = ?1 AND space_id = ?2",
                [user.as_str(), space.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn is_member(&self, space: &SpaceId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM space_members WHERE user_id = ?1 AND space_id = ?2",
                    [user.as_str(), space.as_str()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Full user records of every member, in join order.
    #[instrument(skip(self), fields(space_id = %space))]
    pub fn members(&self, space: &SpaceId) -> Result<Vec<User>, StoreError> {
        self.db.with_conn(|conn| {
            if !space_exists(conn, space)? {
                return Err(StoreError::NotFound(format!("space {space}")));
            }
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email FROM users u
                 JOIN space_members m ON m.user_id = u.id
                 WHERE m.space_id = ?1
                 ORDER BY m.joined_at, u.id",
            )?;
            let mut rows = stmt.query([space.as_str()])?;
            let mut users = Vec::new();
            while let Some(row) = rows.next()? {
                users.push(User {
                    id: UserId::from_raw(get::<String>(row, 0, "users", "id")?),
                    name: get(row, 1, "users", "name")?,
                    email: get(row, 2, "users", "email")?,
                });
            }
            Ok(users)
        })
    }

    /// Member ids only. NotFound for an unknown space.
    pub fn member_ids(&self, space: &SpaceId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            if !space_exists(conn, space)? {
                return Err(StoreError::NotFound(format!("space {space}")));
            }
            let mut stmt = conn.prepare(
                "SELECT user_id FROM space_members WHERE space_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let mut rows = stmt.query([space.as_str()])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(UserId::from_raw(get::<String>(row, 0, "space_members", "user_id")?));
            }
            Ok(ids)
        })
    }

    /// Delete a space; memberships, messages and invites cascade.
    #[instrument(skip(self), fields(space_id = %id))]
    pub fn delete(&self, id: &SpaceId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM spaces WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("space {id}")));
            }
            Ok(())
        })
    }
}

impl MembershipResolver for SpaceRepo {
    fn members_of(&self, space: &SpaceId) -> Result<Vec<UserId>, ServiceError> {
        self.member_ids(space).map_err(|e| {
            debug!(space_id = %space, error = %e, "membership lookup failed");
            ServiceError::from(e)
        })
    }
}
