//! Tagged frame unions for the socket surface. Every inbound tag maps to one
//! handler in the session; every outbound event is one variant emitted by the
//! message pipeline, the room registry, or the session itself.

use crate::error::ErrorCode;
use crate::models::MessageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Late authentication for clients that did not pass a token in the
    /// handshake; only accepted while the connection is still anonymous.
    Auth { token: String },
    JoinConversation { conversation_id: Uuid },
    LeaveConversation { conversation_id: Uuid },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: Option<String>,
    },
    TypingStart { conversation_id: Uuid },
    TypingStop { conversation_id: Uuid },
    MarkRead { conversation_id: Uuid, message_id: i64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Connected {
        // The handshake ack is the one payload that predates the snake_case
        // convention; clients still read `userId` here.
        #[serde(rename = "userId")]
        user_id: String,
        message: String,
    },
    JoinedConversation {
        conversation_id: Uuid,
    },
    NewMessage {
        message_id: i64,
        conversation_id: Uuid,
        sender_id: String,
        content: String,
        message_type: MessageKind,
        sent_at: DateTime<Utc>,
    },
    MessageEdited {
        message_id: i64,
        conversation_id: Uuid,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: i64,
        conversation_id: Uuid,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: String,
        is_typing: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        // The enum only contains types whose serialization cannot fail.
        serde_json::to_string(self).expect("outbound frame serializes")
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { code, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_tags_parse() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"join_conversation","conversation_id":"7f2a1f9e-58f1-4b9e-a9c1-0b8f4c1d2e3f"}"#,
        )
        .unwrap();
        assert!(matches!(frame, InboundFrame::JoinConversation { .. }));

        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"send_message","conversation_id":"7f2a1f9e-58f1-4b9e-a9c1-0b8f4c1d2e3f","content":"hi"}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::SendMessage { content, message_type, .. } => {
                assert_eq!(content, "hi");
                assert!(message_type.is_none());
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"mark_read","conversation_id":"7f2a1f9e-58f1-4b9e-a9c1-0b8f4c1d2e3f","message_id":42}"#,
        )
        .unwrap();
        assert!(matches!(frame, InboundFrame::MarkRead { message_id: 42, .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"shrug"}"#).is_err());
    }

    #[test]
    fn outbound_new_message_uses_snake_case_ids() {
        let frame = OutboundFrame::NewMessage {
            message_id: 7,
            conversation_id: Uuid::nil(),
            sender_id: "u1".into(),
            content: "hi".into(),
            message_type: MessageKind::Text,
            sent_at: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["message_id"], 7);
        assert_eq!(value["message_type"], "text");
    }

    #[test]
    fn error_frame_carries_stable_code() {
        let frame = OutboundFrame::error(ErrorCode::NotAuthorized, "not a participant");
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "NotAuthorized");
    }
}
