//! Kind-based interpretation of inbound envelopes.
//!
//! Each kind has exactly one handler. A handler receives the verified sender
//! (never read from the payload) and returns the outbound envelope; its route
//! is the audience.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use eligos_core::{MessageRecorder, ServiceError, UserId};

use crate::envelope::{Envelope, Route};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("kind {kind} cannot be routed to {route}")]
    InvalidRoute { kind: String, route: &'static str },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl DispatchError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UnknownKind(_) => "unknown_kind",
            Self::InvalidRoute { .. } => "invalid_route",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Service(e) => e.error_kind(),
        }
    }
}

/// Handler for one envelope kind.
pub trait KindHandler: Send + Sync {
    fn handle(&self, sender: &UserId, route: &Route, payload: Value) -> Result<Envelope, DispatchError>;
}

/// Routes an inbound envelope to the handler registered for its kind.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn KindHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with the built-in `message` kind.
    pub fn with_message_handler(recorder: Arc<dyn MessageRecorder>) -> Self {
        let mut dispatcher = Self::new();
        let _ = dispatcher.register(MessageHandler::KIND, Arc::new(MessageHandler::new(recorder)));
        dispatcher
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn KindHandler>,
    ) -> Option<Arc<dyn KindHandler>> {
        self.handlers.insert(kind.into(), handler)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn dispatch(&self, sender: &UserId, envelope: Envelope) -> Result<Envelope, DispatchError> {
        let Envelope { kind, route, payload } = envelope;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| DispatchError::UnknownKind(kind.clone()))?;
        handler.handle(sender, &route, payload)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageBody {
    Text(String),
    Object { body: String },
}

/// Persists a chat message and fans the stored form out to the space.
pub struct MessageHandler {
    recorder: Arc<dyn MessageRecorder>,
}

impl MessageHandler {
    pub const KIND: &'static str = "message";

    pub fn new(recorder: Arc<dyn MessageRecorder>) -> Self {
        Self { recorder }
    }
}

impl KindHandler for MessageHandler {
    fn handle(&self, sender: &UserId, route: &Route, payload: Value) -> Result<Envelope, DispatchError> {
        let Route::Space(space) = route else {
            return Err(DispatchError::InvalidRoute {
                kind: Self::KIND.to_string(),
                route: "user",
            });
        };

        let body = match serde_json::from_value::<MessageBody>(payload) {
            Ok(MessageBody::Text(body) | MessageBody::Object { body }) => body,
            Err(e) => return Err(DispatchError::InvalidPayload(e.to_string())),
        };
        let body = body.trim();
        if body.is_empty() {
            return Err(DispatchError::InvalidPayload("empty message body".into()));
        }

        let stored = self.recorder.record_message(sender, space, body)?;
        let payload =
            serde_json::to_value(&stored).map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        Ok(Envelope::new(Self::KIND, Route::Space(space.clone()), payload))
    }
}
