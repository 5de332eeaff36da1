//! # Agent Relay
//!
//! In-memory fan-out between one agent connection and its watching users.
//!
//! Each agent id owns at most one agent connection plus any number of
//! watcher connections. Agent output is broadcast to every watcher; a
//! watcher's message is forwarded to the agent and echoed back to all
//! watchers, sender included. A bounded per-agent history ring replays
//! recent context to watchers as they attach.
//!
//! The crate is transport-free: [`Relay::attach_user`] and
//! [`Relay::attach_agent`] hand back bounded `mpsc` receivers that the
//! caller drains into whatever transport it runs (the bundled server
//! drains them into WebSockets).
//!
//! ## Example
//!
//! ```
//! use agent_relay::{MessageKind, Relay};
//!
//! #[tokio::main]
//! async fn main() {
//!     let relay = Relay::default();
//!
//!     let (_agent, mut inbox) = relay.attach_agent("builder-1").await;
//!     let (_watcher, mut feed) = relay.attach_user("builder-1", "mira").await;
//!
//!     relay
//!         .publish_from_agent("builder-1", "compiling...", MessageKind::AgentMessage, None)
//!         .await;
//!     relay.publish_from_user("builder-1", "mira", "status?").await;
//!
//!     // The watcher sees its greeting and replay, then the live traffic.
//!     while let Ok(message) = feed.try_recv() {
//!         println!("[{}] {}", message.agent_id, message.content);
//!     }
//!     // The agent receives the reduced user projection.
//!     assert!(inbox.try_recv().is_ok());
//! }
//! ```

mod error;
mod history;
mod message;
mod relay;

pub use error::DeliveryError;
pub use history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_LIMIT, HistoryRing};
pub use message::{AgentForward, Message, MessageKind, SenderRole};
pub use relay::{ConnectionId, DEFAULT_SEND_BUFFER, Relay, RelayConfig, RelayStats};
