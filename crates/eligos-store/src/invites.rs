use rusqlite::Row;
use tracing::instrument;

use eligos_core::{Invite, InviteId, SpaceId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, normalize_email, now_timestamp};

const SELECT_INVITE: &str = "SELECT id, space_id, space_name, email, created_at FROM invites";

fn invite_from_row(row: &Row<'_>) -> Result<Invite, StoreError> {
    Ok(Invite {
        id: InviteId::from_raw(get::<String>(row, 0, "invites", "id")?),
        space_id: SpaceId::from_raw(get::<String>(row, 1, "invites", "space_id")?),
        space_name: get(row, 2, "invites", "space_name")?,
        email: get(row, 3, "invites", "email")?,
        created_at: get(row, 4, "invites", "created_at")?,
    })
}

#[derive(Clone)]
pub struct InviteRepo {
    db: Database,
}

impl InviteRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(space_id = %space_id))]
    pub fn create(
        &self,
        space_id: &SpaceId,
        space_name: &str,
        email: &str,
    ) -> Result<Invite, StoreError> {
        let email = normalize_email(email);
        self.db.with_conn(|conn| {
            let id = InviteId::new();
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO invites (id, space_id, space_name, email, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), space_id.as_str(), space_name, email, now],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::NotFound(format!("space {space_id}")),
                other => other,
            })?;

            Ok(Invite {
                id,
                space_id: space_id.clone(),
                space_name: space_name.to_string(),
                email: email.clone(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(invite_id = %id))]
    pub fn get(&self, id: &InviteId) -> Result<Invite, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_INVITE} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => invite_from_row(row),
                None => Err(StoreError::NotFound(format!("invite {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(invite_id = %id))]
    pub fn delete(&self, id: &InviteId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM invites WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("invite {id}")));
            }
            Ok(())
        })
    }

    /// Pending invites addressed to `email`, oldest first.
    #[instrument(skip(self))]
    pub fn list_for_email(&self, email: &str) -> Result<Vec<Invite>, StoreError> {
        let email = normalize_email(email);
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_INVITE} WHERE email = ?1 ORDER BY created_at, id"))?;
            let mut rows = stmt.query([email.as_str()])?;
            let mut invites = Vec::new();
            while let Some(row) = rows.next()? {
                invites.push(invite_from_row(row)?);
            }
            Ok(invites)
        })
    }
}
