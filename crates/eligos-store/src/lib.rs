pub mod database;
pub mod error;
pub mod invites;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod spaces;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use invites::InviteRepo;
pub use messages::MessageRepo;
pub use spaces::SpaceRepo;
pub use users::{UserRepo, UserRow};
