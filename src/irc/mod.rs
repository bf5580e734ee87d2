//! Outbound IRC side: wire protocol, network session, and the connection manager.
//!
//! The [`manager::ConnectionManager`] is the only owner of a live session.
//! It reaches the network exclusively through the [`Connector`] and
//! [`Session`] traits, so tests can swap the TCP implementation for a
//! scripted one.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

pub mod client;
pub mod codec;
pub mod manager;
pub mod protocol;

pub use manager::ConnectionManager;

/// Errors produced by the IRC transport.
#[derive(Debug, thiserror::Error)]
pub enum IrcError {
    /// Socket level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// TLS setup or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),
    /// The server rejected registration.
    #[error("registration failed: {0}")]
    Registration(String),
    /// SASL authentication did not succeed.
    #[error("sasl authentication failed: {0}")]
    Sasl(String),
    /// The server sent an `ERROR` line.
    #[error("server error: {0}")]
    Server(String),
    /// The read side of the connection ended.
    #[error("connection closed by peer")]
    Closed,
    /// No traffic arrived within two keep-alive intervals.
    #[error("keep-alive timed out after {seconds}s")]
    KeepaliveTimeout {
        /// Keep-alive interval in seconds.
        seconds: u64,
    },
    /// A connection phase did not finish in time.
    #[error("timed out during {0}")]
    Timeout(&'static str),
}

/// Lifecycle of the single outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session; waiting out the reconnect delay.
    Disconnected,
    /// Opening the socket and registering.
    Connecting,
    /// Registered; joining the configured channels.
    Joining,
    /// Joined and draining the dispatch queue.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Joining => "joining",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Snapshot of the manager published for read-only observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Channels the live session belongs to.
    pub joined: BTreeSet<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            joined: BTreeSet::new(),
        }
    }
}

/// Inbound traffic relevant to the manager, parsed by the session reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Server keep-alive check carrying a token to echo back.
    Ping(String),
    /// Reply to one of our own pings.
    Pong,
    /// The server confirmed we joined a channel.
    Joined(String),
    /// We left or were kicked from a channel.
    Left(String),
    /// A CTCP request addressed to us.
    CtcpQuery {
        /// Nick of the sender.
        from: String,
        /// CTCP command, upper-cased (e.g. `VERSION`).
        command: String,
    },
    /// A plain private message addressed to us.
    Query {
        /// Nick of the sender.
        from: String,
        /// Message text.
        text: String,
    },
    /// The server is closing the link.
    ServerError(String),
    /// Any other line; still counts as liveness.
    Other,
}

/// A registered IRC session: the write side plus an inbound event stream.
pub struct Connection {
    /// Command sink.
    pub session: Box<dyn Session>,
    /// Parsed inbound events. Closed when the socket's read side ends.
    pub events: mpsc::Receiver<SessionEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens and registers new sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete registration. Resolves once the server has
    /// welcomed us, or fails with the handshake error.
    async fn connect(&self) -> Result<Connection, IrcError>;

    /// Human-readable server address for logs.
    fn server(&self) -> String;
}

/// Outbound commands on a registered session.
#[async_trait]
pub trait Session: Send {
    /// Send `JOIN`.
    async fn join(&mut self, channel: &str) -> Result<(), IrcError>;
    /// Send a `PRIVMSG`.
    async fn send(&mut self, target: &str, text: &str) -> Result<(), IrcError>;
    /// Send a `NOTICE`.
    async fn notice(&mut self, target: &str, text: &str) -> Result<(), IrcError>;
    /// Send a keep-alive `PING`.
    async fn ping(&mut self, token: &str) -> Result<(), IrcError>;
    /// Answer a server `PING`.
    async fn pong(&mut self, token: &str) -> Result<(), IrcError>;
    /// Send `QUIT` and flush.
    async fn quit(&mut self, reason: &str) -> Result<(), IrcError>;
}

/// Bot name and build metadata used in canned replies.
pub fn version_string() -> String {
    format!(
        "cpthook {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TARGET")
    )
}
