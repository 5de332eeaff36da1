//! Wire-level message types shared by the relay and its transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Kind of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AgentMessage,
    UserMessage,
    System,
    Status,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Agent,
    User,
    System,
}

/// A single entry in an agent's transcript.
///
/// Messages are immutable once constructed: the relay appends them to the
/// owning agent's history and clones them into each live watcher channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub sender: SenderRole,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Message authored by the agent side of the relay.
    pub fn from_agent(
        agent_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self::build(agent_id, kind, SenderRole::Agent, content, metadata)
    }

    /// Message authored by a watching user. The originating user is kept
    /// in the metadata so observers can tell watchers apart.
    pub fn from_user(
        agent_id: impl Into<String>,
        user_id: &str,
        content: impl Into<String>,
    ) -> Self {
        Self::build(
            agent_id,
            MessageKind::UserMessage,
            SenderRole::User,
            content,
            Some(json!({ "user_id": user_id })),
        )
    }

    /// Relay-originated notice (greetings, connect/disconnect status).
    pub fn system(
        agent_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self::build(agent_id, kind, SenderRole::System, content, None)
    }

    fn build(
        agent_id: impl Into<String>,
        kind: MessageKind,
        sender: SenderRole,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            sender,
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// User id recorded in the metadata, for user-authored messages.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(|v| v.as_str())
    }
}

/// Reduced projection of user traffic delivered to the agent connection.
///
/// The agent does not see full transcript entries; it only needs the
/// content and the user who sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentForward {
    UserMessage { content: String, user_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_shape() {
        let msg = Message::from_agent("alpha", MessageKind::AgentMessage, "hello", None);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "agent_message");
        assert_eq!(value["sender"], "agent");
        assert_eq!(value["agent_id"], "alpha");
        assert_eq!(value["content"], "hello");
        assert!(value["metadata"].is_null());
        assert!(value["id"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn user_message_carries_user_id() {
        let msg = Message::from_user("alpha", "mira", "hi");
        assert_eq!(msg.kind, MessageKind::UserMessage);
        assert_eq!(msg.sender, SenderRole::User);
        assert_eq!(msg.user_id(), Some("mira"));
    }

    #[test]
    fn agent_forward_tagged_encoding() {
        let forward = AgentForward::UserMessage {
            content: "restart the build".into(),
            user_id: "mira".into(),
        };
        let value = serde_json::to_value(&forward).unwrap();
        assert_eq!(value["type"], "user_message");
        assert_eq!(value["content"], "restart the build");
        assert_eq!(value["user_id"], "mira");

        let back: AgentForward = serde_json::from_value(value).unwrap();
        assert_eq!(back, forward);
    }

    #[test]
    fn message_roundtrip_without_metadata_field() {
        // Older clients may omit metadata entirely.
        let raw = r#"{
            "id": "m-1",
            "type": "system",
            "content": "Connected to agent alpha",
            "sender": "system",
            "agent_id": "alpha",
            "timestamp": "2026-01-05T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, MessageKind::System);
        assert!(msg.metadata.is_none());
    }
}
