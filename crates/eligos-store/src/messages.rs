use rusqlite::{OptionalExtension, Row};
use tracing::{debug, instrument};

use eligos_core::{MessageId, MessageRecorder, ServiceError, SpaceId, StoredMessage, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, now_timestamp};

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

fn message_from_row(row: &Row<'_>) -> Result<StoredMessage, StoreError> {
    Ok(StoredMessage {
        id: MessageId::from_raw(get::<String>(row, 0, "messages", "id")?),
        space_id: SpaceId::from_raw(get::<String>(row, 1, "messages", "space_id")?),
        user_id: UserId::from_raw(get::<String>(row, 2, "messages", "user_id")?),
        user_name: get(row, 3, "users", "name")?,
        body: get(row, 4, "messages", "body")?,
        created_at: get(row, 5, "messages", "created_at")?,
    })
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message. The id and timestamp are assigned here.
    ///
    /// NotFound for an unknown space or sender, Conflict if the sender is
    /// not a member of the space.
    #[instrument(skip(self, body), fields(space_id = %space, user_id = %sender))]
    pub fn create(
        &self,
        sender: &UserId,
        space: &SpaceId,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        self.db.with_conn(|conn| {
            let user_name: Option<String> = conn
                .query_row("SELECT name FROM users WHERE id = ?1", [sender.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(user_name) = user_name else {
                return Err(StoreError::NotFound(format!("user {sender}")));
            };

            let space_known = conn
                .query_row("SELECT 1 FROM spaces WHERE id = ?1", [space.as_str()], |_| Ok(()))
                .optional()?
                .is_some();
            if !space_known {
                return Err(StoreError::NotFound(format!("space {space}")));
            }

            let member = conn
                .query_row(
                    "SELECT 1 FROM space_members WHERE user_id = ?1 AND space_id = ?2",
                    [sender.as_str(), space.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !member {
                return Err(StoreError::Conflict(format!(
                    "user {sender} is not a member of space {space}"
                )));
            }

            let id = MessageId::new();
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO messages (id, space_id, user_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), space.as_str(), sender.as_str(), body, now],
            )?;

            Ok(StoredMessage {
                id,
                space_id: space.clone(),
                user_id: sender.clone(),
                user_name,
                body: body.to_string(),
                created_at: now,
            })
        })
    }

    /// History of a space in creation order.
    #[instrument(skip(self), fields(space_id = %space))]
    pub fn list(&self, space: &SpaceId) -> Result<Vec<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.space_id, m.user_id, u.name, m.body, m.created_at
                 FROM messages m JOIN users u ON u.id = m.user_id
                 WHERE m.space_id = ?1
                 ORDER BY m.created_at, m.id",
            )?;
            let mut rows = stmt.query([space.as_str()])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(message_from_row(row)?);
            }
            Ok(messages)
        })
    }
}

impl MessageRecorder for MessageRepo {
    fn record_message(
        &self,
        sender: &UserId,
        space: &SpaceId,
        body: &str,
    ) -> Result<StoredMessage, ServiceError> {
        self.create(sender, space, body).map_err(|e| {
            debug!(space_id = %space, user_id = %sender, error = %e, "message not recorded");
            ServiceError::from(e)
        })
    }
}
