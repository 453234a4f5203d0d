use crate::error::AppError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 10_000;

/// How long after `sent_at` the sender may still edit.
pub fn edit_window() -> Duration {
    Duration::hours(24)
}

/// How long after `sent_at` the sender may still soft-delete.
pub fn delete_window() -> Duration {
    Duration::days(90)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "system" => Ok(Self::System),
            other => Err(AppError::KindInvalid(format!("unknown message kind '{other}'"))),
        }
    }

    /// End users may only send text/image/file; `system` is reserved for the
    /// service itself.
    pub fn parse_user_sendable(value: &str) -> Result<Self, AppError> {
        let kind = Self::parse(value)?;
        if kind == Self::System {
            return Err(AppError::KindInvalid("'system' is reserved".into()));
        }
        Ok(kind)
    }
}

/// Validated message body. Trimmed on construction; guaranteed non-empty and
/// at most `MAX_CONTENT_CHARS` characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::ContentInvalid("content is empty".into()));
        }
        if trimmed.chars().count() > MAX_CONTENT_CHARS {
            return Err(AppError::ContentInvalid(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn editable_at(&self, now: DateTime<Utc>) -> bool {
        now - self.sent_at <= edit_window()
    }

    pub fn deletable_at(&self, now: DateTime<Utc>) -> bool {
        now - self.sent_at <= delete_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_trims_and_accepts_bounds() {
        assert_eq!(MessageContent::new("  hi  ").unwrap().as_str(), "hi");
        assert!(MessageContent::new("x").is_ok());
        assert!(MessageContent::new(&"x".repeat(MAX_CONTENT_CHARS)).is_ok());
    }

    #[test]
    fn content_rejects_empty_and_oversized() {
        assert!(MessageContent::new("").is_err());
        assert!(MessageContent::new("   \n\t ").is_err());
        assert!(MessageContent::new(&"x".repeat(MAX_CONTENT_CHARS + 1)).is_err());
    }

    #[test]
    fn content_counts_characters_not_bytes() {
        // 10_000 multibyte characters are within bounds even though the byte
        // length is far larger.
        assert!(MessageContent::new(&"ü".repeat(MAX_CONTENT_CHARS)).is_ok());
        assert!(MessageContent::new(&"ü".repeat(MAX_CONTENT_CHARS + 1)).is_err());
    }

    #[test]
    fn system_kind_is_not_user_sendable() {
        assert!(MessageKind::parse_user_sendable("text").is_ok());
        assert!(MessageKind::parse_user_sendable("system").is_err());
        assert!(MessageKind::parse("system").is_ok());
    }

    #[test]
    fn edit_window_boundary() {
        let sent_at = Utc::now();
        let msg = Message {
            id: 1,
            conversation_id: Uuid::new_v4(),
            sender_id: "u1".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
            sent_at,
            deleted_at: None,
        };
        assert!(msg.editable_at(sent_at + Duration::hours(24)));
        assert!(!msg.editable_at(sent_at + Duration::hours(24) + Duration::seconds(1)));
        assert!(msg.deletable_at(sent_at + Duration::days(90)));
        assert!(!msg.deletable_at(sent_at + Duration::days(90) + Duration::seconds(1)));
    }
}
