use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Stable machine-readable error codes surfaced to clients (HTTP bodies and
/// socket `error` frames). Codes are part of the wire contract; renaming one
/// is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    AuthMissing,
    AuthMalformed,
    AuthInvalid,
    AuthExpired,
    NotAuthorized,
    ConversationNotFound,
    MessageNotFound,
    ParticipantNotFound,
    ContentInvalid,
    KindInvalid,
    ParticipantCountInvalid,
    SelfConversation,
    RoleInvalidForKind,
    EditWindowExpired,
    DeleteWindowExpired,
    EditForbiddenKind,
    AlreadyDeleted,
    SlowConsumer,
    StoreUnavailable,
    StoreConflict,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthMissing => "AuthMissing",
            Self::AuthMalformed => "AuthMalformed",
            Self::AuthInvalid => "AuthInvalid",
            Self::AuthExpired => "AuthExpired",
            Self::NotAuthorized => "NotAuthorized",
            Self::ConversationNotFound => "ConversationNotFound",
            Self::MessageNotFound => "MessageNotFound",
            Self::ParticipantNotFound => "ParticipantNotFound",
            Self::ContentInvalid => "ContentInvalid",
            Self::KindInvalid => "KindInvalid",
            Self::ParticipantCountInvalid => "ParticipantCountInvalid",
            Self::SelfConversation => "SelfConversation",
            Self::RoleInvalidForKind => "RoleInvalidForKind",
            Self::EditWindowExpired => "EditWindowExpired",
            Self::DeleteWindowExpired => "DeleteWindowExpired",
            Self::EditForbiddenKind => "EditForbiddenKind",
            Self::AlreadyDeleted => "AlreadyDeleted",
            Self::SlowConsumer => "SlowConsumer",
            Self::StoreUnavailable => "StoreUnavailable",
            Self::StoreConflict => "StoreConflict",
            Self::Internal => "Internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("missing credentials")]
    AuthMissing,

    #[error("malformed token")]
    AuthMalformed,

    #[error("invalid token")]
    AuthInvalid,

    #[error("expired token")]
    AuthExpired,

    #[error("not a participant of this conversation")]
    NotAuthorized,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("invalid content: {0}")]
    ContentInvalid(String),

    #[error("invalid message kind: {0}")]
    KindInvalid(String),

    #[error("invalid participant count: {0}")]
    ParticipantCountInvalid(String),

    #[error("cannot start a conversation with yourself")]
    SelfConversation,

    #[error("role not valid for this conversation kind: {0}")]
    RoleInvalidForKind(String),

    #[error("edit window expired")]
    EditWindowExpired,

    #[error("delete window expired")]
    DeleteWindowExpired,

    #[error("system messages cannot be edited")]
    EditForbiddenKind,

    #[error("message already deleted")]
    AlreadyDeleted,

    #[error("outbound queue full, connection evicted")]
    SlowConsumer,

    #[error("conflicting store state: {0}")]
    StoreConflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::AuthMissing => ErrorCode::AuthMissing,
            AppError::AuthMalformed => ErrorCode::AuthMalformed,
            AppError::AuthInvalid => ErrorCode::AuthInvalid,
            AppError::AuthExpired => ErrorCode::AuthExpired,
            AppError::NotAuthorized => ErrorCode::NotAuthorized,
            AppError::ConversationNotFound => ErrorCode::ConversationNotFound,
            AppError::MessageNotFound => ErrorCode::MessageNotFound,
            AppError::ParticipantNotFound => ErrorCode::ParticipantNotFound,
            AppError::ContentInvalid(_) => ErrorCode::ContentInvalid,
            AppError::KindInvalid(_) => ErrorCode::KindInvalid,
            AppError::ParticipantCountInvalid(_) => ErrorCode::ParticipantCountInvalid,
            AppError::SelfConversation => ErrorCode::SelfConversation,
            AppError::RoleInvalidForKind(_) => ErrorCode::RoleInvalidForKind,
            AppError::EditWindowExpired => ErrorCode::EditWindowExpired,
            AppError::DeleteWindowExpired => ErrorCode::DeleteWindowExpired,
            AppError::EditForbiddenKind => ErrorCode::EditForbiddenKind,
            AppError::AlreadyDeleted => ErrorCode::AlreadyDeleted,
            AppError::SlowConsumer => ErrorCode::SlowConsumer,
            AppError::StoreConflict(_) => ErrorCode::StoreConflict,
            AppError::Database(e) if is_transient(e) => ErrorCode::StoreUnavailable,
            AppError::Database(_) => ErrorCode::Internal,
            AppError::Config(_) | AppError::StartServer(_) => ErrorCode::Internal,
        }
    }

    /// Transient store failures are retried once before surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Database(e) if is_transient(e))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthMissing
            | AppError::AuthMalformed
            | AppError::AuthInvalid
            | AppError::AuthExpired => StatusCode::UNAUTHORIZED,
            AppError::NotAuthorized => StatusCode::FORBIDDEN,
            AppError::ConversationNotFound
            | AppError::MessageNotFound
            | AppError::ParticipantNotFound => StatusCode::NOT_FOUND,
            AppError::ContentInvalid(_)
            | AppError::KindInvalid(_)
            | AppError::ParticipantCountInvalid(_)
            | AppError::SelfConversation
            | AppError::RoleInvalidForKind(_)
            | AppError::EditWindowExpired
            | AppError::DeleteWindowExpired
            | AppError::EditForbiddenKind => StatusCode::BAD_REQUEST,
            AppError::AlreadyDeleted => StatusCode::GONE,
            AppError::StoreConflict(_) => StatusCode::CONFLICT,
            AppError::SlowConsumer
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::StartServer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    )
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code().as_str();

        // 500s carry an opaque id that correlates the response with the log
        // line; the underlying error text never reaches the client.
        let (message, error_id) = if status == StatusCode::INTERNAL_SERVER_ERROR {
            let error_id = uuid::Uuid::new_v4().to_string();
            tracing::error!(%error_id, error = %self, "internal error");
            ("internal server error".to_string(), Some(error_id))
        } else {
            (self.to_string(), None)
        };

        (status, Json(ErrorBody { code, message, error_id })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_400() {
        assert_eq!(
            AppError::ContentInvalid("empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::SelfConversation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::EditWindowExpired.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_errors_map_to_401() {
        for e in [
            AppError::AuthMissing,
            AppError::AuthMalformed,
            AppError::AuthInvalid,
            AppError::AuthExpired,
        ] {
            assert_eq!(e.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn non_participant_maps_to_403() {
        assert_eq!(AppError::NotAuthorized.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn already_deleted_is_gone() {
        assert_eq!(AppError::AlreadyDeleted.status_code(), StatusCode::GONE);
        assert_eq!(AppError::AlreadyDeleted.code(), ErrorCode::AlreadyDeleted);
    }

    #[test]
    fn pool_timeout_is_retryable() {
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!AppError::NotAuthorized.is_retryable());
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::StoreUnavailable.as_str(), "StoreUnavailable");
        assert_eq!(AppError::AuthExpired.code().as_str(), "AuthExpired");
    }
}
