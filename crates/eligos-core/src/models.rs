//! Domain records shared by the store, the hub and the HTTP layer.

use serde::{Deserialize, Serialize};

use crate::ids::{InviteId, MessageId, SpaceId, UserId};

/// A registered account. The password hash stays inside the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
}

/// Canonical form of a chat message after persistence.
///
/// This is what gets fanned out to space members, never the raw client input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub space_id: SpaceId,
    pub user_id: UserId,
    pub user_name: String,
    pub body: String,
    pub created_at: String,
}

/// Pending invitation of an email address into a space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub id: InviteId,
    pub space_id: SpaceId,
    pub space_name: String,
    pub email: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_message_wire_shape() {
        let msg = StoredMessage {
            id: MessageId::from_raw("m1"),
            space_id: SpaceId::from_raw("S1"),
            user_id: UserId::from_raw("u1"),
            user_name: "Ada".into(),
            body: "hi".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["body"], "hi");
        assert_eq!(json["space_id"], "S1");
        assert_eq!(json["user_id"], "u1");
    }
}
