use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Customer,
    Agent,
    Business,
    Member,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::Business => "business",
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "customer" => Ok(Self::Customer),
            "agent" => Ok(Self::Agent),
            "business" => Ok(Self::Business),
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            other => Err(AppError::RoleInvalidForKind(format!("unknown role '{other}'"))),
        }
    }

    pub fn can_manage_participants(&self) -> bool {
        matches!(self, Self::Admin | Self::Business)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub role: ParticipantRole,
    pub is_muted: bool,
    pub last_read_message_id: Option<i64>,
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manage_predicate_covers_admin_and_business() {
        assert!(ParticipantRole::Admin.can_manage_participants());
        assert!(ParticipantRole::Business.can_manage_participants());
        assert!(!ParticipantRole::Member.can_manage_participants());
        assert!(!ParticipantRole::Customer.can_manage_participants());
        assert!(!ParticipantRole::Agent.can_manage_participants());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            ParticipantRole::Customer,
            ParticipantRole::Agent,
            ParticipantRole::Business,
            ParticipantRole::Member,
            ParticipantRole::Admin,
        ] {
            assert_eq!(ParticipantRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(ParticipantRole::parse("owner").is_err());
    }
}
