use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::{require_participant, AuthedUser};
use crate::models::{Message, MessageKind};
use crate::state::AppState;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 100;

#[derive(Serialize)]
pub struct MessageDto {
    pub message_id: i64,
    pub conversation_id: Uuid,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    pub content: String,
    pub message_type: MessageKind,
    pub sent_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl MessageDto {
    /// Tombstones keep their row but never leak content.
    fn from_message(message: &Message) -> Self {
        let is_deleted = message.is_deleted();
        Self {
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id.clone(),
            sender_name: None,
            sender_avatar: None,
            content: if is_deleted { String::new() } else { message.content.clone() },
            message_type: message.kind,
            sent_at: message.sent_at,
            is_deleted,
        }
    }
}

#[derive(Deserialize)]
pub struct ListMessagesParams {
    pub limit: Option<i64>,
    pub before_message_id: Option<i64>,
}

#[derive(Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageDto>,
    pub has_more: bool,
}

/// Chronological page of messages with sender decoration. Pagination walks
/// backwards with `before_message_id`.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
    Query(params): Query<ListMessagesParams>,
) -> AppResult<Json<MessagePage>> {
    require_participant(&state.store, id, &user.user_id).await?;

    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    // One row past the page tells us whether older messages remain.
    let mut rows = state.store.list_messages(id, limit + 1, params.before_message_id).await?;
    let has_more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);

    let mut sender_ids: Vec<String> = Vec::new();
    for message in &rows {
        if !sender_ids.contains(&message.sender_id) {
            sender_ids.push(message.sender_id.clone());
        }
    }
    let profiles = state.profiles.get_profiles(&sender_ids).await;

    // Store order is newest-first; clients want chronological.
    let messages = rows
        .iter()
        .rev()
        .map(|message| {
            let mut dto = MessageDto::from_message(message);
            if let Some(profile) = profiles.get(&message.sender_id) {
                dto.sender_name = Some(profile.display_name.clone());
                dto.sender_avatar = profile.avatar_url.clone();
            }
            dto
        })
        .collect();

    Ok(Json(MessagePage { messages, has_more }))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
}

/// HTTP entry into the message pipeline; the broadcast to subscribed sockets
/// happens inside the pipeline after commit.
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<MessageDto>> {
    let message = state
        .pipeline
        .send(id, &user.user_id, &body.content, body.message_type.as_deref())
        .await?;
    Ok(Json(MessageDto::from_message(&message)))
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<i64>,
    Json(body): Json<EditMessageRequest>,
) -> AppResult<Json<MessageDto>> {
    let message = state.pipeline.edit(id, &user.user_id, &body.content).await?;
    Ok(Json(MessageDto::from_message(&message)))
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<SuccessResponse>> {
    state.pipeline.delete(id, &user.user_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
