//! WebSocket Protocol Types
//!
//! Inbound frame types for the user and agent WebSocket endpoints. Frames
//! are JSON objects tagged by a `type` field; anything that fails to
//! decode is counted and dropped without ending the connection.
//!
//! Outbound traffic reuses [`agent_relay::Message`] and
//! [`agent_relay::AgentForward`] directly.

use agent_relay::MessageKind;
use serde::{Deserialize, Serialize};

/// Frames a watcher client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserFrame {
    /// A chat message for the agent (and every other watcher).
    Message { content: String },
    /// Keepalive; answered with a pong.
    Ping,
}

/// Frames an agent client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Output for the watchers. `msg_type` defaults to `agent_message`.
    Message {
        content: String,
        #[serde(default)]
        msg_type: Option<MessageKind>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    /// Status update, always published with the `status` kind.
    Status {
        content: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    /// Keepalive; answered with a pong.
    Ping,
}

/// Control frames the server emits outside the relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Pong,
}

impl ControlFrame {
    /// Wire encoding, avoiding a fallible serialize call at send sites.
    pub fn to_json(self) -> String {
        match self {
            ControlFrame::Pong => r#"{"type":"pong"}"#.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_frame_message() {
        let json = r#"{"type":"message","content":"hello"}"#;
        let frame: UserFrame = serde_json::from_str(json).unwrap();

        match frame {
            UserFrame::Message { content } => assert_eq!(content, "hello"),
            _ => panic!("Expected Message frame"),
        }
    }

    #[test]
    fn test_user_frame_ping() {
        let json = r#"{"type":"ping"}"#;
        let frame: UserFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, UserFrame::Ping));
    }

    #[test]
    fn test_user_frame_unknown_type_rejected() {
        let json = r#"{"type":"resize","rows":40,"cols":120}"#;
        assert!(serde_json::from_str::<UserFrame>(json).is_err());
    }

    #[test]
    fn test_agent_frame_message_defaults() {
        let json = r#"{"type":"message","content":"building"}"#;
        let frame: AgentFrame = serde_json::from_str(json).unwrap();

        match frame {
            AgentFrame::Message {
                content,
                msg_type,
                metadata,
            } => {
                assert_eq!(content, "building");
                assert!(msg_type.is_none());
                assert!(metadata.is_none());
            }
            _ => panic!("Expected Message frame"),
        }
    }

    #[test]
    fn test_agent_frame_message_with_kind_and_metadata() {
        let json = r#"{"type":"message","content":"done","msg_type":"status","metadata":{"code":0}}"#;
        let frame: AgentFrame = serde_json::from_str(json).unwrap();

        match frame {
            AgentFrame::Message {
                msg_type, metadata, ..
            } => {
                assert_eq!(msg_type, Some(MessageKind::Status));
                assert_eq!(metadata.unwrap()["code"], 0);
            }
            _ => panic!("Expected Message frame"),
        }
    }

    #[test]
    fn test_agent_frame_status() {
        let json = r#"{"type":"status","content":"idle"}"#;
        let frame: AgentFrame = serde_json::from_str(json).unwrap();

        match frame {
            AgentFrame::Status { content, metadata } => {
                assert_eq!(content, "idle");
                assert!(metadata.is_none());
            }
            _ => panic!("Expected Status frame"),
        }
    }

    #[test]
    fn test_pong_encoding_matches_serde() {
        let json = serde_json::to_string(&ControlFrame::Pong).unwrap();
        assert_eq!(json, ControlFrame::Pong.to_json());
        assert_eq!(json, r#"{"type":"pong"}"#);
    }
}
