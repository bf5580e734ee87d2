//! Connection manager: owns the single IRC session and drains the dispatch queue.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Joining -> Ready
//!       ^             |            |         |
//!       +-------------+------------+---------+   (any transport error)
//! ```
//!
//! After every failure the manager waits a fixed delay and starts over,
//! forever. Channel membership is never assumed to survive a reconnect: the
//! joined set is cleared on disconnect and the full configured channel list
//! is joined again once registration succeeds.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::{OutboundMessage, QueueReceiver};

use super::protocol;
use super::{
    version_string, Connection, ConnectionState, ConnectionStatus, Connector, IrcError, Session,
    SessionEvent,
};

/// Pause between a connection loss and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Idle time before we `PING` the server, and again before giving up.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Token sent with keep-alive pings.
const PING_TOKEN: &str = "cpthook";

/// Channels the live session belongs to, with idempotent insertion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinedChannelSet {
    channels: BTreeSet<String>,
}

impl JoinedChannelSet {
    /// Whether `channel` is already joined.
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Record a join. Returns `false` if it was already present.
    pub fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_owned())
    }

    /// Forget a channel after a part or kick.
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    /// Forget everything; server-side membership is gone after a disconnect.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Number of joined channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is joined.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Copy of the current membership.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.channels.clone()
    }
}

/// Why a live session ended.
enum SessionEnd {
    /// Every queue producer is gone.
    QueueClosed,
}

/// Owns the outbound session and is the single writer of its state.
pub struct ConnectionManager<C> {
    connector: C,
    queue: QueueReceiver,
    channels: BTreeSet<String>,
    joined: JoinedChannelSet,
    state: ConnectionState,
    status_tx: watch::Sender<ConnectionStatus>,
    reconnect_delay: Duration,
    keepalive: Duration,
}

impl<C> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("channels", &self.channels)
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager that joins `channels` on every connect.
    pub fn new<I, S>(connector: C, queue: QueueReceiver, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            connector,
            queue,
            channels: channels.into_iter().map(Into::into).collect(),
            joined: JoinedChannelSet::default(),
            state: ConnectionState::Disconnected,
            status_tx,
            reconnect_delay: RECONNECT_DELAY,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the keep-alive interval.
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Subscribe to state and membership updates.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Channels joined on every connect.
    pub fn channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    /// Connect, serve and reconnect until the dispatch queue closes.
    pub async fn run(mut self) {
        info!(
            server = %self.connector.server(),
            channels = self.channels.len(),
            "connection manager started"
        );

        loop {
            self.set_state(ConnectionState::Connecting);

            let outcome = match self.connector.connect().await {
                Ok(connection) => self.serve(connection).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(SessionEnd::QueueClosed) => {
                    info!("dispatch queue closed, connection manager stopping");
                    self.joined.clear();
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Err(e) => {
                    warn!(
                        server = %self.connector.server(),
                        error = %e,
                        "connection terminated"
                    );
                }
            }

            self.joined.clear();
            self.set_state(ConnectionState::Disconnected);
            info!(
                delay_secs = self.reconnect_delay.as_secs(),
                "reconnecting after delay"
            );
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Drive one registered session until it fails or the queue closes.
    async fn serve(&mut self, connection: Connection) -> Result<SessionEnd, IrcError> {
        let Connection {
            mut session,
            mut events,
        } = connection;

        self.set_state(ConnectionState::Joining);
        let channels: Vec<String> = self.channels.iter().cloned().collect();
        for channel in &channels {
            self.ensure_joined(session.as_mut(), channel).await?;
        }
        self.set_state(ConnectionState::Ready);

        let mut deadline = deadline_after(self.keepalive);
        let mut ping_outstanding = false;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(IrcError::Closed);
                    };
                    deadline = deadline_after(self.keepalive);
                    ping_outstanding = false;
                    self.handle_event(session.as_mut(), event).await?;
                }
                msg = self.queue.dequeue() => {
                    let Some(msg) = msg else {
                        if let Err(e) = session.quit("shutting down").await {
                            debug!(error = %e, "quit failed");
                        }
                        return Ok(SessionEnd::QueueClosed);
                    };
                    self.deliver(session.as_mut(), msg).await?;
                }
                () = tokio::time::sleep_until(deadline) => {
                    if ping_outstanding {
                        return Err(IrcError::KeepaliveTimeout {
                            seconds: self.keepalive.as_secs(),
                        });
                    }
                    debug!("connection idle, sending keep-alive ping");
                    session.ping(PING_TOKEN).await?;
                    ping_outstanding = true;
                    deadline = deadline_after(self.keepalive);
                }
            }
        }
    }

    /// Join `channel` unless the session already belongs to it.
    async fn ensure_joined(
        &mut self,
        session: &mut dyn Session,
        channel: &str,
    ) -> Result<(), IrcError> {
        if self.joined.contains(channel) {
            return Ok(());
        }
        info!(channel, "joining channel");
        session.join(channel).await?;
        self.joined.insert(channel);
        self.publish();
        Ok(())
    }

    /// Join the destination and emit every line in order.
    ///
    /// A failure part-way drops the rest of the message; it is not re-queued.
    /// Messages for malformed destinations are dropped without touching the
    /// session.
    async fn deliver(
        &mut self,
        session: &mut dyn Session,
        msg: OutboundMessage,
    ) -> Result<(), IrcError> {
        debug!(
            msg_id = %msg.id(),
            channel = msg.destination(),
            lines = msg.lines().len(),
            "took message from dispatch queue"
        );

        if !protocol::is_valid_channel(msg.destination()) {
            warn!(
                msg_id = %msg.id(),
                channel = msg.destination(),
                undelivered = msg.lines().len(),
                "dropping message, destination is not a valid channel"
            );
            return Ok(());
        }

        if let Err(e) = self.ensure_joined(session, msg.destination()).await {
            warn!(
                msg_id = %msg.id(),
                channel = msg.destination(),
                undelivered = msg.lines().len(),
                "dropping message, join failed"
            );
            return Err(e);
        }

        for (sent, line) in msg.lines().iter().enumerate() {
            if let Err(e) = session.send(msg.destination(), line).await {
                warn!(
                    msg_id = %msg.id(),
                    channel = msg.destination(),
                    undelivered = msg.lines().len().saturating_sub(sent),
                    "dropping message, send failed"
                );
                return Err(e);
            }
        }

        info!(msg_id = %msg.id(), channel = msg.destination(), "message delivered");
        Ok(())
    }

    async fn handle_event(
        &mut self,
        session: &mut dyn Session,
        event: SessionEvent,
    ) -> Result<(), IrcError> {
        match event {
            SessionEvent::Ping(token) => session.pong(&token).await?,
            SessionEvent::Joined(channel) => {
                debug!(channel = %channel, "join confirmed");
                if self.joined.insert(&channel) {
                    self.publish();
                }
            }
            SessionEvent::Left(channel) => {
                warn!(channel = %channel, "removed from channel, will rejoin on next message");
                if self.joined.remove(&channel) {
                    self.publish();
                }
            }
            SessionEvent::CtcpQuery { from, command } => {
                if command == "VERSION" {
                    let reply = protocol::ctcp(&format!("VERSION {}", version_string()));
                    session.notice(&from, &reply).await?;
                } else {
                    debug!(from = %from, command = %command, "ignoring ctcp query");
                }
            }
            SessionEvent::Query { from, .. } => {
                debug!(from = %from, "answering direct query");
                session.notice(&from, &canned_reply()).await?;
            }
            SessionEvent::ServerError(reason) => return Err(IrcError::Server(reason)),
            SessionEvent::Pong | SessionEvent::Other => {}
        }
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state changed");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(ConnectionStatus {
            state: self.state,
            joined: self.joined.snapshot(),
        });
    }
}

fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or(now)
}

/// Reply sent to anyone who messages the bot directly.
pub fn canned_reply() -> String {
    format!(
        "Hi, I am {}. I relay webhook notifications and do not read messages.",
        version_string()
    )
}
