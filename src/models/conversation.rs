use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Business,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Business => "business",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "business" => Ok(Self::Business),
            other => Err(AppError::KindInvalid(format!("unknown conversation kind '{other}'"))),
        }
    }

    /// Hard cap on participant rows for this kind. Direct conversations are
    /// closed at two; groups at eight; business conversations are unbounded.
    pub fn max_participants(&self) -> Option<usize> {
        match self {
            Self::Direct => Some(2),
            Self::Group => Some(GROUP_MAX_PARTICIPANTS),
            Self::Business => None,
        }
    }
}

pub const GROUP_MIN_PARTICIPANTS: usize = 2;
pub const GROUP_MAX_PARTICIPANTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_message_id: Option<i64>,
}

/// Optional adjunct carried by group conversations. Validated on
/// construction; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    title: Option<String>,
    description: Option<String>,
    max_participants: Option<usize>,
    auto_delete_days: Option<u32>,
}

impl ConversationMetadata {
    pub fn new(
        title: Option<String>,
        description: Option<String>,
        max_participants: Option<usize>,
        auto_delete_days: Option<u32>,
    ) -> Result<Self, AppError> {
        if let Some(t) = &title {
            if t.chars().count() > 100 {
                return Err(AppError::ContentInvalid("title exceeds 100 characters".into()));
            }
        }
        if let Some(d) = &description {
            if d.chars().count() > 500 {
                return Err(AppError::ContentInvalid("description exceeds 500 characters".into()));
            }
        }
        if let Some(max) = max_participants {
            if !(GROUP_MIN_PARTICIPANTS..=GROUP_MAX_PARTICIPANTS).contains(&max) {
                return Err(AppError::ParticipantCountInvalid(format!(
                    "max participants must be between {GROUP_MIN_PARTICIPANTS} and {GROUP_MAX_PARTICIPANTS}"
                )));
            }
        }
        if let Some(days) = auto_delete_days {
            if !(1..=365).contains(&days) {
                return Err(AppError::ContentInvalid(
                    "auto-delete days must be between 1 and 365".into(),
                ));
            }
        }
        Ok(Self { title, description, max_participants, auto_delete_days })
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn max_participants(&self) -> Option<usize> {
        self.max_participants
    }

    pub fn auto_delete_days(&self) -> Option<u32> {
        self.auto_delete_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [ConversationKind::Direct, ConversationKind::Group, ConversationKind::Business] {
            assert_eq!(ConversationKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(ConversationKind::parse("channel").is_err());
    }

    #[test]
    fn metadata_bounds() {
        assert!(ConversationMetadata::new(Some("x".repeat(100)), None, None, None).is_ok());
        assert!(ConversationMetadata::new(Some("x".repeat(101)), None, None, None).is_err());
        assert!(ConversationMetadata::new(None, Some("x".repeat(501)), None, None).is_err());
        assert!(ConversationMetadata::new(None, None, Some(8), None).is_ok());
        assert!(ConversationMetadata::new(None, None, Some(9), None).is_err());
        assert!(ConversationMetadata::new(None, None, Some(1), None).is_err());
        assert!(ConversationMetadata::new(None, None, None, Some(365)).is_ok());
        assert!(ConversationMetadata::new(None, None, None, Some(0)).is_err());
        assert!(ConversationMetadata::new(None, None, None, Some(366)).is_err());
    }
}
