pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod ws;

pub use auth::{AuthError, AuthKeys, CurrentUser};
pub use config::{load_config, ConfigError, ServerConfig};
pub use error::{ApiError, ServerError};
pub use server::{build_router, start, AppState, ServerHandle};
