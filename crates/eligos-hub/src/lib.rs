//! The connection hub: per-connection reader/writer loops, the single
//! coordination loop that owns the registry, and kind-based dispatch.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod hub;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use config::HubConfig;
pub use connection::{Connection, ConnectionState, EnqueueError, InboundEvent, Outbox};
pub use dispatch::{DispatchError, Dispatcher, KindHandler, MessageHandler};
pub use envelope::{Envelope, EnvelopeError, Route};
pub use error::{HubError, LinkError};
pub use frame::Frame;
pub use hub::{HubHandle, HubRuntime, HubSnapshot, HubStats};
pub use shutdown::ShutdownCoordinator;
