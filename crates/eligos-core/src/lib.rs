pub mod ids;
pub mod models;
pub mod services;

pub use ids::{ConnectionId, InviteId, MessageId, SpaceId, UserId};
pub use models::{Invite, Space, StoredMessage, User};
pub use services::{MembershipResolver, MessageRecorder, ServiceError};
