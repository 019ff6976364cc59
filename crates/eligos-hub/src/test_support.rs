//! In-memory collaborators and transports for hub tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use serde_json::Value;

use eligos_core::{
    MembershipResolver, MessageId, MessageRecorder, ServiceError, SpaceId, StoredMessage, UserId,
};

use crate::frame::Frame;

/// Spaces and members in memory; records messages with ids `m1`, `m2`, ...
#[derive(Default)]
pub struct Directory {
    spaces: HashMap<SpaceId, Vec<UserId>>,
    recorded: Mutex<Vec<StoredMessage>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_space(mut self, space: &str, members: &[&str]) -> Self {
        self.spaces.insert(
            SpaceId::from_raw(space),
            members.iter().map(|m| UserId::from_raw(*m)).collect(),
        );
        self
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<StoredMessage> {
        self.recorded.lock().unwrap().clone()
    }

    fn check_up(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("directory down".into()));
        }
        Ok(())
    }
}

impl MembershipResolver for Directory {
    fn members_of(&self, space: &SpaceId) -> Result<Vec<UserId>, ServiceError> {
        self.check_up()?;
        self.spaces
            .get(space)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("space {space}")))
    }
}

impl MessageRecorder for Directory {
    fn record_message(
        &self,
        sender: &UserId,
        space: &SpaceId,
        body: &str,
    ) -> Result<StoredMessage, ServiceError> {
        self.check_up()?;
        let members = self.members_of(space)?;
        if !members.contains(sender) {
            return Err(ServiceError::Rejected(format!("{sender} not in {space}")));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = StoredMessage {
            id: MessageId::from_raw(format!("m{n}")),
            space_id: space.clone(),
            user_id: sender.clone(),
            user_name: sender.to_string(),
            body: body.to_string(),
            created_at: format!("2026-01-01T00:00:{:02}.000000Z", n % 60),
        };
        self.recorded.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

/// The test's end of an in-memory transport.
pub struct Peer {
    /// Frames the peer sends to the server.
    pub outgoing: fmpsc::UnboundedSender<Result<Frame, String>>,
    /// Frames the server wrote to the peer.
    pub incoming: fmpsc::UnboundedReceiver<Frame>,
}

pub type ServerSink = fmpsc::UnboundedSender<Frame>;
pub type ServerStream = fmpsc::UnboundedReceiver<Result<Frame, String>>;

pub fn transport() -> (Peer, ServerSink, ServerStream) {
    let (sink, incoming) = fmpsc::unbounded();
    let (outgoing, stream) = fmpsc::unbounded();
    (Peer { outgoing, incoming }, sink, stream)
}

impl Peer {
    pub fn send_text(&self, text: impl Into<String>) {
        self.outgoing.unbounded_send(Ok(Frame::Text(text.into()))).unwrap();
    }

    /// Next envelopes from the wire, splitting coalesced frames. Pings are skipped.
    pub async fn envelopes(&mut self, n: usize) -> Vec<Value> {
        let mut out = Vec::new();
        while out.len() < n {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.incoming.next())
                .await
                .expect("timed out waiting for frames")
                .expect("transport closed");
            match frame {
                Frame::Text(text) => {
                    for line in text.split('\n') {
                        out.push(serde_json::from_str(line).expect("frame split mid-envelope"));
                    }
                }
                Frame::Ping | Frame::Pong => {}
                Frame::Close => panic!("closed while waiting for {n} envelopes, got {}", out.len()),
            }
        }
        out
    }

    /// Wait for the close frame, skipping anything else.
    pub async fn closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.incoming.next()).await {
                Ok(Some(Frame::Close)) | Ok(None) => return true,
                Ok(Some(_)) => {}
                Err(_) => return false,
            }
        }
    }
}

pub fn user(id: &str) -> UserId {
    UserId::from_raw(id)
}

pub fn shared(dir: Directory) -> Arc<Directory> {
    Arc::new(dir)
}
