//! One live link: the bounded outbound queue, the reader and writer loops,
//! and the per-connection state machine.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use eligos_core::{ConnectionId, UserId};

use crate::config::HubConfig;
use crate::error::LinkError;
use crate::frame::Frame;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a push onto the outbound queue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

/// A decoded-but-not-interpreted inbound frame, tagged with the verified sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender: UserId,
    pub raw: String,
}

/// Shared per-connection state. The hub holds it in the registry; the two
/// loops hold it for their lifetime.
pub struct Connection {
    id: ConnectionId,
    user: UserId,
    tx: mpsc::Sender<Arc<String>>,
    /// Cancelled by the hub to close the outbound queue.
    queue_closed: CancellationToken,
    /// Cancelled by either loop when the link goes down.
    link_down: CancellationToken,
    state: AtomicU8,
    live_loops: AtomicU8,
}

impl Connection {
    /// Create a connection for a verified identity, returning the receiving
    /// half of its outbound queue for the writer.
    pub fn new(user: UserId, capacity: usize) -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue_closed = CancellationToken::new();
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            user,
            tx,
            queue_closed: queue_closed.clone(),
            link_down: CancellationToken::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            live_loops: AtomicU8::new(2),
        });
        (conn, Outbox { rx, closed: queue_closed })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, to: ConnectionState) {
        let _ = self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    pub(crate) fn mark_registered(&self) {
        self.advance(ConnectionState::Registered);
    }

    /// Non-blocking push. Never waits on a slow peer.
    pub fn try_enqueue(&self, frame: Arc<String>) -> Result<(), EnqueueError> {
        if self.queue_closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue. The writer drains what is already queued,
    /// sends a close frame and exits. Idempotent.
    pub fn close(&self) {
        self.advance(ConnectionState::Closing);
        self.queue_closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.queue_closed.is_cancelled() || self.link_down.is_cancelled()
    }

    fn tear_down_link(&self) {
        self.advance(ConnectionState::Closing);
        self.link_down.cancel();
    }

    /// Called once by each loop on exit; the last one out marks the connection closed.
    fn loop_finished(&self) {
        if self.live_loops.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.advance(ConnectionState::Closed);
            debug!(connection_id = %self.id, user_id = %self.user, "connection closed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("state", &self.state())
            .finish()
    }
}

/// Receiving half of a connection's outbound queue. Owned by the writer.
pub struct Outbox {
    rx: mpsc::Receiver<Arc<String>>,
    closed: CancellationToken,
}

impl Outbox {
    /// Next queued frame. After the hub closes the queue, already-queued
    /// frames are still yielded, then `None`.
    pub async fn recv(&mut self) -> Option<Arc<String>> {
        if self.closed.is_cancelled() {
            return self.rx.try_recv().ok();
        }
        tokio::select! {
            biased;
            item = self.rx.recv() => item,
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// A frame queued right now, if any.
    pub fn try_next(&mut self) -> Option<Arc<String>> {
        self.rx.try_recv().ok()
    }
}

/// How the writer loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    QueueClosed,
    LinkDown,
    Failed(LinkError),
}

/// How the reader loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    PeerClosed,
    DeadlineExpired,
    FrameTooLarge(usize),
    LinkDown,
    HubGone,
    Failed(String),
}

/// Newlines fold to spaces, surrounding whitespace goes.
pub(crate) fn normalize_inbound(raw: &str) -> String {
    raw.replace('\n', " ").trim().to_string()
}

async fn write_frame<Si>(sink: &mut Si, frame: Frame, config: &HubConfig) -> Result<(), LinkError>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    match time::timeout(config.write_wait(), sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LinkError::Transport(e.to_string())),
        Err(_) => Err(LinkError::WriteTimeout(config.write_wait())),
    }
}

/// The only task that writes to the transport.
///
/// Frames already queued when one is picked up go out in the same write,
/// joined by `\n`. A ping goes out every `ping_interval`.
pub async fn write_loop<Si>(
    conn: Arc<Connection>,
    mut outbox: Outbox,
    mut sink: Si,
    config: HubConfig,
) -> WriterExit
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    let period = config.ping_interval();
    let mut ping = time::interval_at(Instant::now() + period, period);

    let exit = loop {
        tokio::select! {
            item = outbox.recv() => match item {
                Some(first) => {
                    let mut text = String::from(first.as_str());
                    while let Some(next) = outbox.try_next() {
                        text.push('\n');
                        text.push_str(&next);
                    }
                    if let Err(e) = write_frame(&mut sink, Frame::Text(text), &config).await {
                        break WriterExit::Failed(e);
                    }
                }
                None => {
                    let _ = write_frame(&mut sink, Frame::Close, &config).await;
                    break WriterExit::QueueClosed;
                }
            },
            _ = ping.tick() => {
                trace!(connection_id = %conn.id, "ping");
                if let Err(e) = write_frame(&mut sink, Frame::Ping, &config).await {
                    break WriterExit::Failed(e);
                }
            }
            () = conn.link_down.cancelled() => break WriterExit::LinkDown,
        }
    };

    match &exit {
        WriterExit::Failed(e) => {
            warn!(connection_id = %conn.id, user_id = %conn.user, error = %e, "write failed");
        }
        other => debug!(connection_id = %conn.id, exit = ?other, "writer stopped"),
    }

    conn.tear_down_link();
    let _ = sink.close().await;
    conn.loop_finished();
    exit
}

/// Reads frames until the peer goes away, the read deadline passes or a
/// frame is too large. Only a pong pushes the deadline out.
pub async fn read_loop<St, E>(
    conn: Arc<Connection>,
    mut stream: St,
    inbound: mpsc::Sender<InboundEvent>,
    config: HubConfig,
) -> ReaderExit
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + config.pong_wait();

    let exit = loop {
        tokio::select! {
            () = time::sleep_until(deadline) => break ReaderExit::DeadlineExpired,
            () = conn.link_down.cancelled() => break ReaderExit::LinkDown,
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(raw))) => {
                    if raw.len() > config.max_frame_bytes {
                        break ReaderExit::FrameTooLarge(raw.len());
                    }
                    let raw = normalize_inbound(&raw);
                    if raw.is_empty() {
                        continue;
                    }
                    let event = InboundEvent { sender: conn.user.clone(), raw };
                    tokio::select! {
                        sent = inbound.send(event) => {
                            if sent.is_err() {
                                break ReaderExit::HubGone;
                            }
                        }
                        () = conn.link_down.cancelled() => break ReaderExit::LinkDown,
                        () = time::sleep_until(deadline) => break ReaderExit::DeadlineExpired,
                    }
                }
                Some(Ok(Frame::Pong)) => {
                    trace!(connection_id = %conn.id, "pong");
                    deadline = Instant::now() + config.pong_wait();
                }
                Some(Ok(Frame::Ping)) => {}
                Some(Ok(Frame::Close)) | None => break ReaderExit::PeerClosed,
                Some(Err(e)) => break ReaderExit::Failed(e.to_string()),
            },
        }
    };

    match &exit {
        ReaderExit::PeerClosed | ReaderExit::LinkDown => {
            debug!(connection_id = %conn.id, exit = ?exit, "reader stopped");
        }
        other => {
            warn!(connection_id = %conn.id, user_id = %conn.user, exit = ?other, "reader terminated");
        }
    }

    conn.tear_down_link();
    conn.loop_finished();
    exit
}
