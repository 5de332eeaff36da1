//! Connection manager relaying traffic between one agent and its watchers.
//!
//! Each agent id owns at most one agent connection and any number of
//! watcher (user) connections. Agent output fans out to every watcher;
//! user messages are forwarded to the agent and echoed to every watcher,
//! the sender included. A bounded history ring per agent feeds replay when
//! a watcher attaches.
//!
//! The relay never blocks while holding its lock: peers hand it a bounded
//! `mpsc` sender at attach time, and all delivery goes through
//! `try_send`. A closed peer is detached on the spot; a full one drops
//! that frame and stays attached.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_LIMIT, HistoryRing};
use crate::message::{AgentForward, Message, MessageKind};

/// Default per-connection outbound channel capacity.
pub const DEFAULT_SEND_BUFFER: usize = 64;

/// Identifier for one attached connection, unique for the lifetime of a
/// relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tuning knobs for a relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Messages retained per agent.
    pub history_capacity: usize,
    /// Messages replayed to a newly attached watcher.
    pub replay_limit: usize,
    /// Per-connection outbound channel capacity. Raised to
    /// `replay_limit + 1` if set lower, so a fresh watcher channel can
    /// absorb the greeting plus a full replay before its drain task runs.
    pub send_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            replay_limit: DEFAULT_REPLAY_LIMIT,
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

/// Snapshot of live connection state, serialized by the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStats {
    pub total_user_connections: usize,
    pub total_agent_connections: usize,
    pub agents_with_watchers: Vec<String>,
    pub connected_agents: Vec<String>,
}

/// Live state for one attached connection.
enum Peer {
    User {
        agent_id: String,
        user_id: String,
        connected_at: DateTime<Utc>,
        tx: mpsc::Sender<Message>,
    },
    Agent {
        agent_id: String,
        connected_at: DateTime<Utc>,
        tx: mpsc::Sender<AgentForward>,
    },
}

impl Peer {
    fn connected_at(&self) -> DateTime<Utc> {
        match self {
            Peer::User { connected_at, .. } | Peer::Agent { connected_at, .. } => *connected_at,
        }
    }
}

#[derive(Default)]
struct RelayInner {
    /// agent id -> connections watching that agent
    watchers: HashMap<String, HashSet<ConnectionId>>,
    /// agent id -> the sole agent connection
    agents: HashMap<String, ConnectionId>,
    /// agent id -> recent transcript, created on first recorded message
    history: HashMap<String, HistoryRing>,
    /// connection id -> peer metadata and outbound sender
    peers: HashMap<ConnectionId, Peer>,
}

/// The relay. Cheap to share behind an `Arc`; every operation takes
/// `&self`.
pub struct Relay {
    inner: RwLock<RelayInner>,
    next_id: AtomicU64,
    config: RelayConfig,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl Relay {
    pub fn new(mut config: RelayConfig) -> Self {
        config.send_buffer = config.send_buffer.max(config.replay_limit + 1);
        Self {
            inner: RwLock::new(RelayInner::default()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Attach a watcher connection under `agent_id`.
    ///
    /// Returns the connection id and the receiving half of the watcher's
    /// outbound channel. The channel is pre-loaded with a `system`
    /// greeting followed by up to `replay_limit` recent messages in
    /// chronological order; live traffic follows. Neither the greeting
    /// nor the replay is visible to any other connection.
    pub async fn attach_user(
        &self,
        agent_id: &str,
        user_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<Message>) {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::channel(self.config.send_buffer);

        let mut inner = self.inner.write().await;
        inner
            .watchers
            .entry(agent_id.to_string())
            .or_default()
            .insert(id);

        let greeting = Message::system(
            agent_id,
            MessageKind::System,
            format!("Connected to agent {agent_id}"),
        );
        // Freshly created channel sized for greeting + replay; these
        // sends cannot fail.
        let _ = tx.try_send(greeting);
        if let Some(ring) = inner.history.get(agent_id) {
            for message in ring.recent(self.config.replay_limit) {
                let _ = tx.try_send(message.clone());
            }
        }

        inner.peers.insert(
            id,
            Peer::User {
                agent_id: agent_id.to_string(),
                user_id: user_id.to_string(),
                connected_at: Utc::now(),
                tx,
            },
        );
        debug!("{id} watching agent {agent_id} as user {user_id}");
        (id, rx)
    }

    /// Attach the agent connection for `agent_id`, claiming the agent
    /// slot from any previous holder.
    ///
    /// The replaced connection is not torn down here; it keeps draining
    /// until its transport detaches it, but it no longer receives user
    /// forwards. An "Agent connected" status is recorded and broadcast to
    /// the watchers.
    pub async fn attach_agent(
        &self,
        agent_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<AgentForward>) {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::channel(self.config.send_buffer);

        let mut inner = self.inner.write().await;
        if let Some(old) = inner.agents.insert(agent_id.to_string(), id) {
            debug!("{id} replaces {old} as agent {agent_id}");
        }
        inner.peers.insert(
            id,
            Peer::Agent {
                agent_id: agent_id.to_string(),
                connected_at: Utc::now(),
                tx,
            },
        );

        let notice = Message::system(agent_id, MessageKind::Status, "Agent connected");
        self.record(&mut inner, agent_id, &notice);
        self.fan_out(&mut inner, agent_id, &notice);
        debug!("{id} attached as agent {agent_id}");
        (id, rx)
    }

    /// Detach a connection and discard its membership state.
    ///
    /// Unknown or already-detached ids are a no-op, so transports may
    /// call this unconditionally on every exit path. An agent connection
    /// releases the agent slot only if it still holds it; a replaced
    /// agent detaching late must not evict its successor.
    pub async fn detach(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(peer) = remove_peer(&mut inner, id) {
            let held = (Utc::now() - peer.connected_at()).num_seconds();
            match &peer {
                Peer::User {
                    agent_id, user_id, ..
                } => debug!("{id} user {user_id} stopped watching {agent_id} after {held}s"),
                Peer::Agent { agent_id, .. } => {
                    debug!("{id} agent {agent_id} detached after {held}s");
                }
            }
        }
    }

    /// Publish agent output to every watcher of `agent_id`.
    ///
    /// The message is recorded in history before delivery. Per-watcher
    /// delivery failures never surface here: closed watchers are
    /// detached, slow ones lose this frame.
    pub async fn publish_from_agent(
        &self,
        agent_id: &str,
        content: impl Into<String>,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
    ) -> Message {
        let message = Message::from_agent(agent_id, kind, content, metadata);
        let mut inner = self.inner.write().await;
        self.record(&mut inner, agent_id, &message);
        self.fan_out(&mut inner, agent_id, &message);
        message
    }

    /// Publish a message from a watching user.
    ///
    /// The message is recorded once, forwarded to the agent connection as
    /// a reduced [`AgentForward`] when one is attached (skipped quietly
    /// otherwise), and echoed to every watcher including the sender's own
    /// connection.
    pub async fn publish_from_user(
        &self,
        agent_id: &str,
        user_id: &str,
        content: impl Into<String>,
    ) -> Message {
        let message = Message::from_user(agent_id, user_id, content);
        let mut inner = self.inner.write().await;
        self.record(&mut inner, agent_id, &message);

        if let Some(&conn) = inner.agents.get(agent_id) {
            if let Some(Peer::Agent { tx, .. }) = inner.peers.get(&conn) {
                let forward = AgentForward::UserMessage {
                    content: message.content.clone(),
                    user_id: user_id.to_string(),
                };
                if let Err(err) = try_deliver(tx, forward) {
                    debug!("forward to agent {agent_id} failed: {err}");
                }
            }
        }

        self.fan_out(&mut inner, agent_id, &message);
        message
    }

    /// Record and broadcast a relay-originated notice, e.g. the
    /// "Agent disconnected" status after an agent session ends.
    pub async fn publish_system(
        &self,
        agent_id: &str,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Message {
        let message = Message::system(agent_id, kind, content);
        let mut inner = self.inner.write().await;
        self.record(&mut inner, agent_id, &message);
        self.fan_out(&mut inner, agent_id, &message);
        message
    }

    /// Number of live watcher connections for one agent.
    pub async fn watcher_count(&self, agent_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner.watchers.get(agent_id).map_or(0, HashSet::len)
    }

    /// Snapshot of live connection state.
    pub async fn stats(&self) -> RelayStats {
        let inner = self.inner.read().await;
        RelayStats {
            total_user_connections: inner.watchers.values().map(HashSet::len).sum(),
            total_agent_connections: inner.agents.len(),
            agents_with_watchers: inner.watchers.keys().cloned().collect(),
            connected_agents: inner.agents.keys().cloned().collect(),
        }
    }

    fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Append to the agent's transcript, creating the ring on first use.
    fn record(&self, inner: &mut RelayInner, agent_id: &str, message: &Message) {
        inner
            .history
            .entry(agent_id.to_string())
            .or_insert_with(|| HistoryRing::new(self.config.history_capacity))
            .push(message.clone());
    }

    /// Deliver one message to every watcher of `agent_id`, detaching
    /// watchers whose channel has closed.
    fn fan_out(&self, inner: &mut RelayInner, agent_id: &str, message: &Message) {
        let mut dead = Vec::new();
        if let Some(set) = inner.watchers.get(agent_id) {
            for &conn in set {
                let Some(Peer::User { tx, .. }) = inner.peers.get(&conn) else {
                    continue;
                };
                match try_deliver(tx, message.clone()) {
                    Ok(()) => {}
                    Err(DeliveryError::Closed) => dead.push(conn),
                    Err(DeliveryError::Full) => {
                        warn!("{conn} send buffer full, dropping message {}", message.id);
                    }
                }
            }
        }
        for conn in dead {
            debug!("{conn} unreachable, detaching");
            remove_peer(inner, conn);
        }
    }
}

/// Non-blocking send primitive for one peer delivery attempt.
fn try_deliver<T>(tx: &mpsc::Sender<T>, frame: T) -> Result<(), DeliveryError> {
    tx.try_send(frame).map_err(|err| match err {
        TrySendError::Closed(_) => DeliveryError::Closed,
        TrySendError::Full(_) => DeliveryError::Full,
    })
}

/// Drop a connection from the peer table and its membership set. Returns
/// the removed peer, `None` when the id was unknown.
fn remove_peer(inner: &mut RelayInner, id: ConnectionId) -> Option<Peer> {
    let peer = inner.peers.remove(&id)?;
    match &peer {
        Peer::User { agent_id, .. } => {
            if let Some(set) = inner.watchers.get_mut(agent_id) {
                set.remove(&id);
                if set.is_empty() {
                    inner.watchers.remove(agent_id);
                }
            }
        }
        Peer::Agent { agent_id, .. } => {
            if inner.agents.get(agent_id) == Some(&id) {
                inner.agents.remove(agent_id);
            }
        }
    }
    Some(peer)
}
