/// A transport frame as the connection loops see it.
///
/// The server maps WebSocket messages onto this; tests use in-memory channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Heartbeat ping.
    Ping,
    /// Heartbeat acknowledgement.
    Pong,
    Close,
}
