//! The registry and its single coordination loop.
//!
//! All registry mutation happens inside [`Hub::run`]. Everything else talks
//! to it through [`HubHandle`], which only holds channel senders.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use eligos_core::{ConnectionId, MembershipResolver, UserId};

use crate::config::HubConfig;
use crate::connection::{read_loop, write_loop, Connection, EnqueueError, InboundEvent};
use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, Route};
use crate::error::HubError;
use crate::frame::Frame;
use crate::shutdown::ShutdownCoordinator;

/// Delivery counters, owned by the hub loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Envelopes pushed onto an outbound queue.
    pub delivered: u64,
    /// Connections removed because their queue was full or closed.
    pub evicted: u64,
    /// Inbound frames that failed to decode or dispatch.
    pub dropped_frames: u64,
    /// Direct envelopes for identities that were not connected.
    pub discarded_notifications: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    /// Registered identities, sorted.
    pub connected: Vec<UserId>,
    pub stats: HubStats,
}

struct Deregister {
    user: UserId,
    /// Only remove the entry if it is still this connection.
    connection: Option<ConnectionId>,
}

enum Control {
    Notify(Envelope),
    Snapshot(oneshot::Sender<HubSnapshot>),
    IsConnected(UserId, oneshot::Sender<bool>),
}

struct Hub {
    connections: HashMap<UserId, Arc<Connection>>,
    membership: Arc<dyn MembershipResolver>,
    dispatcher: Dispatcher,
    stats: HubStats,
    register_rx: mpsc::UnboundedReceiver<Arc<Connection>>,
    deregister_rx: mpsc::UnboundedReceiver<Deregister>,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
}

impl Hub {
    async fn run(mut self) {
        info!("hub loop started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(conn) = self.register_rx.recv() => self.register(conn),
                Some(req) = self.deregister_rx.recv() => self.deregister(req),
                Some(ctl) = self.control_rx.recv() => self.control(ctl),
                Some(event) = self.inbound_rx.recv() => self.inbound(event),
                else => break,
            }
        }

        for (user, conn) in self.connections.drain() {
            debug!(user_id = %user, connection_id = %conn.id(), "closing on shutdown");
            conn.close();
        }
        // Accepted but never registered: their loops are already running.
        self.register_rx.close();
        while let Ok(conn) = self.register_rx.try_recv() {
            debug!(user_id = %conn.user(), connection_id = %conn.id(), "closing unregistered on shutdown");
            conn.close();
        }
        info!(stats = ?self.stats, "hub loop stopped");
    }

    fn register(&mut self, conn: Arc<Connection>) {
        if conn.is_closed() {
            debug!(connection_id = %conn.id(), "skipping registration of closed connection");
            return;
        }
        conn.mark_registered();
        let user = conn.user().clone();
        info!(user_id = %user, connection_id = %conn.id(), "connection registered");
        if let Some(previous) = self.connections.insert(user, conn) {
            // Left to fail on its own; it can no longer receive anything.
            debug!(connection_id = %previous.id(), "replaced by reconnect");
        }
    }

    fn deregister(&mut self, req: Deregister) {
        let Some(current) = self.connections.get(&req.user) else {
            return;
        };
        if let Some(expected) = &req.connection {
            if current.id() != expected {
                debug!(user_id = %req.user, connection_id = %expected, "stale deregistration ignored");
                return;
            }
        }
        if let Some(conn) = self.connections.remove(&req.user) {
            conn.close();
            info!(user_id = %req.user, connection_id = %conn.id(), "connection deregistered");
        }
    }

    fn control(&mut self, ctl: Control) {
        match ctl {
            Control::Notify(envelope) => self.deliver(&envelope),
            Control::Snapshot(reply) => {
                let mut connected: Vec<UserId> = self.connections.keys().cloned().collect();
                connected.sort();
                let _ = reply.send(HubSnapshot {
                    connected,
                    stats: self.stats,
                });
            }
            Control::IsConnected(user, reply) => {
                let _ = reply.send(self.connections.contains_key(&user));
            }
        }
    }

    fn inbound(&mut self, event: InboundEvent) {
        let envelope = match Envelope::decode(&event.raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.dropped_frames += 1;
                debug!(user_id = %event.sender, error = %e, "dropping undecodable frame");
                return;
            }
        };
        let kind = envelope.kind.clone();
        match self.dispatcher.dispatch(&event.sender, envelope) {
            Ok(outbound) => self.deliver(&outbound),
            Err(e) => {
                self.stats.dropped_frames += 1;
                debug!(
                    user_id = %event.sender,
                    kind = %kind,
                    error_kind = e.error_kind(),
                    error = %e,
                    "dispatch failed, event dropped"
                );
            }
        }
    }

    fn deliver(&mut self, envelope: &Envelope) {
        let text = match envelope.encode() {
            Ok(text) => Arc::new(text),
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "outbound envelope not encodable");
                return;
            }
        };

        match &envelope.route {
            Route::Space(space) => {
                let members = match self.membership.members_of(space) {
                    Ok(members) => members,
                    Err(e) => {
                        debug!(space_id = %space, error_kind = e.error_kind(), error = %e, "audience lookup failed");
                        return;
                    }
                };
                for member in &members {
                    let _ = self.push(member, &text);
                }
            }
            Route::User(user) => {
                if !self.connections.contains_key(user) {
                    self.stats.discarded_notifications += 1;
                    debug!(user_id = %user, kind = %envelope.kind, "recipient not connected");
                    return;
                }
                let _ = self.push(user, &text);
            }
        }
    }

    /// Non-blocking push to one registered identity. A full or closed
    /// queue evicts the connection on the spot.
    fn push(&mut self, user: &UserId, text: &Arc<String>) -> bool {
        let Some(conn) = self.connections.get(user) else {
            return false;
        };
        match conn.try_enqueue(Arc::clone(text)) {
            Ok(()) => {
                self.stats.delivered += 1;
                true
            }
            Err(reason) => {
                let reason = match reason {
                    EnqueueError::Full => "queue full",
                    EnqueueError::Closed => "queue closed",
                };
                warn!(user_id = %user, connection_id = %conn.id(), reason, "evicting connection");
                conn.close();
                let _ = self.connections.remove(user);
                self.stats.evicted += 1;
                false
            }
        }
    }
}

/// Cloneable access to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Arc<Connection>>,
    deregister_tx: mpsc::UnboundedSender<Deregister>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    control_tx: mpsc::UnboundedSender<Control>,
    coordinator: ShutdownCoordinator,
    config: Arc<HubConfig>,
}

impl HubHandle {
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Take over a transport for a verified identity: create the connection,
    /// register it, then start its reader and writer.
    pub fn accept<Si, St, E>(&self, user: UserId, sink: Si, stream: St) -> Result<Arc<Connection>, HubError>
    where
        Si: Sink<Frame> + Unpin + Send + 'static,
        Si::Error: Display,
        St: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.coordinator.is_shutting_down() {
            return Err(HubError::ShuttingDown);
        }

        let (conn, outbox) = Connection::new(user, self.config.outbound_queue_capacity);
        self.register(Arc::clone(&conn))?;

        let config = HubConfig::clone(&self.config);
        let _ = self.coordinator.spawn(write_loop(Arc::clone(&conn), outbox, sink, config));

        let reader_conn = Arc::clone(&conn);
        let inbound = self.inbound_tx.clone();
        let deregister = self.deregister_tx.clone();
        let config = HubConfig::clone(&self.config);
        let _ = self.coordinator.spawn(async move {
            let _ = read_loop(Arc::clone(&reader_conn), stream, inbound, config).await;
            let _ = deregister.send(Deregister {
                user: reader_conn.user().clone(),
                connection: Some(reader_conn.id().clone()),
            });
        });

        Ok(conn)
    }

    /// Hand an already-built connection to the hub loop.
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        self.register_tx.send(conn).map_err(|_| HubError::ShuttingDown)
    }

    /// Remove whatever connection is registered for `user`. No-op if none.
    pub fn deregister(&self, user: UserId) -> Result<(), HubError> {
        self.deregister_tx
            .send(Deregister { user, connection: None })
            .map_err(|_| HubError::ShuttingDown)
    }

    /// Queue an inbound event as if a reader had produced it.
    pub async fn submit(&self, event: InboundEvent) -> Result<(), HubError> {
        self.inbound_tx.send(event).await.map_err(|_| HubError::ShuttingDown)
    }

    /// Administrative push to one identity. Discarded if it is not connected.
    pub fn notify(&self, user: UserId, kind: impl Into<String>, payload: Value) -> Result<(), HubError> {
        let envelope = Envelope::new(kind, Route::User(user), payload);
        self.control_tx
            .send(Control::Notify(envelope))
            .map_err(|_| HubError::ShuttingDown)
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Snapshot(tx))
            .map_err(|_| HubError::ShuttingDown)?;
        rx.await.map_err(|_| HubError::ShuttingDown)
    }

    pub async fn is_connected(&self, user: &UserId) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Control::IsConnected(user.clone(), tx))
            .map_err(|_| HubError::ShuttingDown)?;
        rx.await.map_err(|_| HubError::ShuttingDown)
    }
}

/// A started hub: the loop task plus the handle to reach it.
pub struct HubRuntime {
    handle: HubHandle,
    coordinator: ShutdownCoordinator,
    hub_task: JoinHandle<()>,
    grace: std::time::Duration,
}

impl HubRuntime {
    /// Validate `config` and spawn the hub loop. Must be called inside a Tokio runtime.
    pub fn start(
        config: HubConfig,
        membership: Arc<dyn MembershipResolver>,
        dispatcher: Dispatcher,
    ) -> Result<Self, HubError> {
        config.validate()?;

        let coordinator = ShutdownCoordinator::new();
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (deregister_tx, deregister_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        info!(kinds = ?dispatcher.kinds(), queue = config.outbound_queue_capacity, "starting hub");

        let hub = Hub {
            connections: HashMap::new(),
            membership,
            dispatcher,
            stats: HubStats::default(),
            register_rx,
            deregister_rx,
            inbound_rx,
            control_rx,
            shutdown: coordinator.token(),
        };
        let hub_task = tokio::spawn(hub.run());

        let grace = config.shutdown_grace();
        let handle = HubHandle {
            register_tx,
            deregister_tx,
            inbound_tx,
            control_tx,
            coordinator: coordinator.clone(),
            config: Arc::new(config),
        };

        Ok(Self {
            handle,
            coordinator,
            hub_task,
            grace,
        })
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Close every registered connection, give connection tasks the grace
    /// period to finish, then return regardless.
    pub async fn shutdown(self) {
        info!("hub shutting down");
        self.coordinator.shutdown();
        if let Err(e) = self.hub_task.await {
            warn!(error = %e, "hub loop ended abnormally");
        }
        let _ = self.coordinator.drain(self.grace).await;
        info!("hub shut down");
    }
}
