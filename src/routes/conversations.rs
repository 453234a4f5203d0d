use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::AuthedUser;
use crate::models::{Participant, ParticipantRole};
use crate::services::Profile;
use crate::state::AppState;

const DEFAULT_PAGE: i64 = 20;
const MAX_PAGE: i64 = 100;

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct ParticipantView {
    pub user_id: String,
    pub role: ParticipantRole,
    pub is_muted: bool,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_online: bool,
}

fn decorate(participant: &Participant, profiles: &HashMap<String, Profile>) -> ParticipantView {
    let profile = profiles.get(&participant.user_id);
    ParticipantView {
        user_id: participant.user_id.clone(),
        role: participant.role,
        is_muted: participant.is_muted,
        display_name: profile
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| "Unknown User".to_string()),
        avatar_url: profile.and_then(|p| p.avatar_url.clone()),
        is_online: profile.map(|p| p.is_online).unwrap_or(false),
    }
}

#[derive(Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub kind: crate::models::ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<i64>,
    pub unread_count: i64,
    pub is_muted: bool,
    pub participants: Vec<ParticipantView>,
}

/// Chat list: conversations by recency with unread counts and decorated
/// participants.
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthedUser,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = params.offset.unwrap_or(0).max(0);

    let rows = state.conversations.list_for_user(&user.user_id, limit, offset).await?;

    let mut participants_by_conversation: Vec<Vec<Participant>> = Vec::with_capacity(rows.len());
    let mut all_user_ids: Vec<String> = Vec::new();
    for row in &rows {
        let participants = state.store.list_participants(row.conversation.id).await?;
        for p in &participants {
            if !all_user_ids.contains(&p.user_id) {
                all_user_ids.push(p.user_id.clone());
            }
        }
        participants_by_conversation.push(participants);
    }
    let profiles = state.profiles.get_profiles(&all_user_ids).await;

    let mut out = Vec::with_capacity(rows.len());
    for (row, participants) in rows.into_iter().zip(participants_by_conversation) {
        let unread = state.read_cursors.unread_for(&user.user_id, row.conversation.id).await?;
        out.push(ConversationSummary {
            id: row.conversation.id,
            kind: row.conversation.kind,
            title: row.conversation.title,
            created_at: row.conversation.created_at,
            last_activity: row.conversation.last_activity,
            last_message_id: row.conversation.last_message_id,
            unread_count: unread,
            is_muted: row.is_muted,
            participants: participants.iter().map(|p| decorate(p, &profiles)).collect(),
        });
    }

    Ok(Json(out))
}

#[derive(Serialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub kind: crate::models::ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<i64>,
    pub participants: Vec<ParticipantView>,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationDetail>> {
    let (conversation, participants) =
        state.conversations.get_with_participants(&user.user_id, id).await?;

    let ids: Vec<String> = participants.iter().map(|p| p.user_id.clone()).collect();
    let profiles = state.profiles.get_profiles(&ids).await;

    Ok(Json(ConversationDetail {
        id: conversation.id,
        kind: conversation.kind,
        title: conversation.title,
        created_at: conversation.created_at,
        last_activity: conversation.last_activity,
        last_message_id: conversation.last_message_id,
        participants: participants.iter().map(|p| decorate(p, &profiles)).collect(),
    }))
}

#[derive(Deserialize)]
pub struct CreateDirectRequest {
    pub target_user_id: String,
}

#[derive(Serialize)]
pub struct CreatedConversationResponse {
    pub conversation_id: Uuid,
}

pub async fn create_direct(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<CreateDirectRequest>,
) -> AppResult<Json<CreatedConversationResponse>> {
    let conversation_id = state
        .conversations
        .create_direct(&user.user_id, &body.target_user_id)
        .await?;
    Ok(Json(CreatedConversationResponse { conversation_id }))
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub participants: Vec<String>,
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<CreateGroupRequest>,
) -> AppResult<Json<CreatedConversationResponse>> {
    let conversation_id = state
        .conversations
        .create_group(&user.user_id, &body.name, &body.participants)
        .await?;
    Ok(Json(CreatedConversationResponse { conversation_id }))
}

#[derive(Deserialize)]
pub struct CreateBusinessRequest {
    pub business_user_id: String,
    #[serde(default)]
    pub agent_user_id: Option<String>,
}

/// The caller is the customer.
pub async fn create_business(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<CreateBusinessRequest>,
) -> AppResult<Json<CreatedConversationResponse>> {
    let conversation_id = state
        .conversations
        .create_business(&user.user_id, &body.business_user_id, body.agent_user_id.as_deref())
        .await?;
    Ok(Json(CreatedConversationResponse { conversation_id }))
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub message_id: i64,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.read_cursors.mark_read(&user.user_id, id, body.message_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<ParticipantRole>,
}

pub async fn add_participant(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AddParticipantRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state
        .conversations
        .add_participant(&user.user_id, id, &body.user_id, body.role)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((id, target)): Path<(Uuid, String)>,
) -> AppResult<Json<SuccessResponse>> {
    state.conversations.remove_participant(&user.user_id, id, &target).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: ParticipantRole,
}

pub async fn update_role(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((id, target)): Path<(Uuid, String)>,
    Json(body): Json<UpdateRoleRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.conversations.update_role(&user.user_id, id, &target, body.role).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
pub struct SetMutedRequest {
    pub muted: bool,
}

pub async fn set_muted(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SetMutedRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.conversations.set_muted(&user.user_id, id, body.muted).await?;
    Ok(Json(SuccessResponse { success: true }))
}
