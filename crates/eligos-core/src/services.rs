//! Narrow interfaces the connection hub uses to reach durable state.
//!
//! Both calls are synchronous and may fail. The hub never talks to a
//! database directly; it only sees these traits.

use crate::ids::{SpaceId, UserId};
use crate::models::StoredMessage;

/// Failure reported by an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Answers "who should receive events for space S".
pub trait MembershipResolver: Send + Sync {
    /// Members of `space`. Fails with [`ServiceError::NotFound`] for an unknown space.
    fn members_of(&self, space: &SpaceId) -> Result<Vec<UserId>, ServiceError>;
}

/// Durably records a chat message and returns its canonical form.
pub trait MessageRecorder: Send + Sync {
    fn record_message(
        &self,
        sender: &UserId,
        space: &SpaceId,
        body: &str,
    ) -> Result<StoredMessage, ServiceError>;
}
