//! Authorization guards that enforce permission checks at the type level.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::Identity;
use crate::models::Participant;
use crate::state::AppState;
use crate::store::Store;

/// Authenticated caller, extracted from the identity the bearer middleware
/// stashed in request extensions.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AppError::AuthMissing)?;
        Ok(AuthedUser { user_id: identity.user_id })
    }
}

/// Verify the caller holds a participant row in the conversation and return
/// it with full role/mute context. Missing conversation maps to 404; an
/// existing conversation the caller is not in maps to 403.
pub async fn require_participant(
    store: &Store,
    conversation_id: Uuid,
    user_id: &str,
) -> Result<Participant, AppError> {
    match store.get_participant(conversation_id, user_id).await? {
        Some(participant) => Ok(participant),
        None => {
            if store.get_conversation(conversation_id).await?.is_none() {
                Err(AppError::ConversationNotFound)
            } else {
                Err(AppError::NotAuthorized)
            }
        }
    }
}

/// Bearer-token middleware for the protected /api surface.
pub async fn bearer_auth(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::AuthMissing)?;

    let token = header.strip_prefix("Bearer ").ok_or(AppError::AuthMalformed)?;
    let identity = state.verifier.verify(token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
