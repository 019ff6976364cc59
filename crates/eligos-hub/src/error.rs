use std::time::Duration;

/// Errors surfaced by the hub API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub is shutting down")]
    ShuttingDown,

    #[error("invalid hub config: {0}")]
    InvalidConfig(String),
}

/// A failed write on one connection's transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}
