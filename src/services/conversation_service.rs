use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::require_participant;
use crate::models::{
    conversation::{GROUP_MAX_PARTICIPANTS, GROUP_MIN_PARTICIPANTS},
    Conversation, ConversationKind, ConversationMetadata, MessageContent, Participant,
    ParticipantRole,
};
use crate::services::message_service::{MessagePipeline, SendLocks};
use crate::store::{ConversationForUser, Store};
use crate::websocket::RoomRegistry;

#[derive(Clone)]
pub struct ConversationService {
    store: Store,
    registry: RoomRegistry,
    pipeline: MessagePipeline,
    locks: Arc<SendLocks>,
}

impl ConversationService {
    pub fn new(
        store: Store,
        registry: RoomRegistry,
        pipeline: MessagePipeline,
        locks: Arc<SendLocks>,
    ) -> Self {
        Self { store, registry, pipeline, locks }
    }

    /// Idempotent: the same pair (in either order) always yields the same
    /// conversation id.
    pub async fn create_direct(&self, caller: &str, target: &str) -> AppResult<Uuid> {
        if caller == target {
            return Err(AppError::SelfConversation);
        }

        self.store.insert_user(caller).await?;
        self.store.insert_user(target).await?;

        if let Some(existing) = self.store.find_direct_conversation(caller, target).await? {
            return Ok(existing);
        }

        let participants = vec![
            (caller.to_string(), ParticipantRole::Member),
            (target.to_string(), ParticipantRole::Member),
        ];
        self.store
            .create_conversation_with_participants(ConversationKind::Direct, None, &participants)
            .await
    }

    /// Caller becomes admin; everyone else a member. Group size (caller
    /// included) must land in 2..=8. A system "created" notice is appended.
    pub async fn create_group(
        &self,
        caller: &str,
        name: &str,
        others: &[String],
    ) -> AppResult<Uuid> {
        let metadata = ConversationMetadata::new(Some(name.to_string()), None, None, None)?;

        let mut distinct: BTreeSet<&str> = others.iter().map(String::as_str).collect();
        distinct.remove(caller);

        let total = distinct.len() + 1;
        if !(GROUP_MIN_PARTICIPANTS..=GROUP_MAX_PARTICIPANTS).contains(&total) {
            return Err(AppError::ParticipantCountInvalid(format!(
                "group size must be between {GROUP_MIN_PARTICIPANTS} and {GROUP_MAX_PARTICIPANTS}, got {total}"
            )));
        }

        self.store.insert_user(caller).await?;
        for user in &distinct {
            self.store.insert_user(user).await?;
        }

        let mut participants = vec![(caller.to_string(), ParticipantRole::Admin)];
        participants
            .extend(distinct.into_iter().map(|u| (u.to_string(), ParticipantRole::Member)));

        let id = self
            .store
            .create_conversation_with_participants(
                ConversationKind::Group,
                metadata.title(),
                &participants,
            )
            .await?;

        let notice = MessageContent::new(&format!("{caller} created the group \"{name}\""))?;
        self.append_notice(id, &notice).await?;

        Ok(id)
    }

    pub async fn create_business(
        &self,
        customer: &str,
        business: &str,
        agent: Option<&str>,
    ) -> AppResult<Uuid> {
        if customer == business {
            return Err(AppError::SelfConversation);
        }

        self.store.insert_user(customer).await?;
        self.store.insert_user(business).await?;
        if let Some(agent) = agent {
            self.store.insert_user(agent).await?;
        }

        let mut participants = vec![
            (customer.to_string(), ParticipantRole::Customer),
            (business.to_string(), ParticipantRole::Business),
        ];
        if let Some(agent) = agent {
            participants.push((agent.to_string(), ParticipantRole::Agent));
        }

        self.store
            .create_conversation_with_participants(ConversationKind::Business, None, &participants)
            .await
    }

    /// Caller needs a managing role. Kind-specific size and role rules are
    /// enforced here; the participant insert and its "joined" notice commit
    /// together.
    pub async fn add_participant(
        &self,
        caller: &str,
        conversation_id: Uuid,
        user_id: &str,
        role: Option<ParticipantRole>,
    ) -> AppResult<()> {
        let caller_row = require_participant(&self.store, conversation_id, caller).await?;
        if !caller_row.role.can_manage_participants() {
            return Err(AppError::NotAuthorized);
        }

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;

        let role = role.unwrap_or(ParticipantRole::Member);
        validate_role_for_kind(conversation.kind, role)?;

        if let Some(max) = conversation.kind.max_participants() {
            let current = self.store.count_participants(conversation_id).await?;
            if current as usize >= max {
                return Err(AppError::ParticipantCountInvalid(format!(
                    "conversation is full ({max} participants)"
                )));
            }
        }

        self.store.insert_user(user_id).await?;
        let notice = MessageContent::new(&format!("{user_id} joined the conversation"))?;

        let _guard = self.locks.acquire(conversation_id).await;
        let message = self
            .store
            .add_participant_with_notice(conversation_id, user_id, role, &notice)
            .await?;
        self.pipeline.publish_new(&message).await;
        Ok(())
    }

    /// Admins may remove anyone; everyone may remove themselves. The removal
    /// and its "left" notice commit together; the removed user's live
    /// connections are forced out of the room afterwards.
    pub async fn remove_participant(
        &self,
        caller: &str,
        conversation_id: Uuid,
        user_id: &str,
    ) -> AppResult<()> {
        let caller_row = require_participant(&self.store, conversation_id, caller).await?;
        if caller != user_id && caller_row.role != ParticipantRole::Admin {
            return Err(AppError::NotAuthorized);
        }

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;

        // Removals must not leave the conversation in a state its kind
        // forbids: direct conversations are fixed at two, groups keep at
        // least two participants and one admin.
        match conversation.kind {
            ConversationKind::Direct => {
                return Err(AppError::ParticipantCountInvalid(
                    "direct conversations cannot lose participants".into(),
                ));
            }
            ConversationKind::Group => {
                let participants = self.store.list_participants(conversation_id).await?;
                if participants.len() <= GROUP_MIN_PARTICIPANTS {
                    return Err(AppError::ParticipantCountInvalid(format!(
                        "groups keep at least {GROUP_MIN_PARTICIPANTS} participants"
                    )));
                }
                let target_is_admin = participants
                    .iter()
                    .any(|p| p.user_id == user_id && p.role == ParticipantRole::Admin);
                let admin_count = participants
                    .iter()
                    .filter(|p| p.role == ParticipantRole::Admin)
                    .count();
                if target_is_admin && admin_count == 1 {
                    return Err(AppError::RoleInvalidForKind(
                        "groups keep at least one admin".into(),
                    ));
                }
            }
            ConversationKind::Business => {
                // Business conversations keep at least one customer and one
                // business participant.
                let participants = self.store.list_participants(conversation_id).await?;
                let target_role = participants
                    .iter()
                    .find(|p| p.user_id == user_id)
                    .map(|p| p.role)
                    .ok_or(AppError::ParticipantNotFound)?;
                if matches!(target_role, ParticipantRole::Customer | ParticipantRole::Business) {
                    let remaining = participants
                        .iter()
                        .filter(|p| p.role == target_role && p.user_id != user_id)
                        .count();
                    if remaining == 0 {
                        return Err(AppError::RoleInvalidForKind(format!(
                            "business conversations keep at least one {}",
                            target_role.as_str()
                        )));
                    }
                }
            }
        }

        let notice = MessageContent::new(&format!("{user_id} left the conversation"))?;

        {
            let _guard = self.locks.acquire(conversation_id).await;
            let message = self
                .store
                .remove_participant_with_notice(conversation_id, user_id, &notice)
                .await?;
            self.pipeline.publish_new(&message).await;
        }

        self.registry.force_leave_user(conversation_id, user_id).await;
        Ok(())
    }

    pub async fn update_role(
        &self,
        caller: &str,
        conversation_id: Uuid,
        user_id: &str,
        role: ParticipantRole,
    ) -> AppResult<()> {
        let caller_row = require_participant(&self.store, conversation_id, caller).await?;
        if !caller_row.role.can_manage_participants() {
            return Err(AppError::NotAuthorized);
        }

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;
        validate_role_for_kind(conversation.kind, role)?;

        if conversation.kind == ConversationKind::Group && role != ParticipantRole::Admin {
            let participants = self.store.list_participants(conversation_id).await?;
            let target_is_admin = participants
                .iter()
                .any(|p| p.user_id == user_id && p.role == ParticipantRole::Admin);
            let admin_count = participants
                .iter()
                .filter(|p| p.role == ParticipantRole::Admin)
                .count();
            if target_is_admin && admin_count == 1 {
                return Err(AppError::RoleInvalidForKind("groups keep at least one admin".into()));
            }
        }

        self.store.update_role(conversation_id, user_id, role).await
    }

    /// Mute is per-participant, self-service only.
    pub async fn set_muted(
        &self,
        caller: &str,
        conversation_id: Uuid,
        muted: bool,
    ) -> AppResult<()> {
        require_participant(&self.store, conversation_id, caller).await?;
        self.store.set_muted(conversation_id, caller, muted).await
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationForUser>> {
        self.store.list_conversations_for_user(user_id, limit, offset).await
    }

    /// Conversation detail with all participant rows; caller must be one of
    /// them.
    pub async fn get_with_participants(
        &self,
        caller: &str,
        conversation_id: Uuid,
    ) -> AppResult<(Conversation, Vec<Participant>)> {
        require_participant(&self.store, conversation_id, caller).await?;
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;
        let participants = self.store.list_participants(conversation_id).await?;
        Ok((conversation, participants))
    }

    /// Append a system notice outside any other transaction (used right
    /// after group creation, when ordering races are impossible but the
    /// send-lock discipline is kept anyway).
    async fn append_notice(&self, conversation_id: Uuid, notice: &MessageContent) -> AppResult<()> {
        let _guard = self.locks.acquire(conversation_id).await;
        let message = self
            .store
            .insert_message(
                conversation_id,
                crate::models::SYSTEM_USER_ID,
                notice,
                crate::models::MessageKind::System,
            )
            .await?;
        self.pipeline.publish_new(&message).await;
        Ok(())
    }
}

fn validate_role_for_kind(kind: ConversationKind, role: ParticipantRole) -> AppResult<()> {
    let allowed = match kind {
        ConversationKind::Direct => matches!(role, ParticipantRole::Member),
        ConversationKind::Group => {
            matches!(role, ParticipantRole::Member | ParticipantRole::Admin)
        }
        ConversationKind::Business => matches!(
            role,
            ParticipantRole::Customer | ParticipantRole::Agent | ParticipantRole::Business
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::RoleInvalidForKind(format!(
            "role '{}' is not valid in a {} conversation",
            role.as_str(),
            kind.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_kind_matrix() {
        assert!(validate_role_for_kind(ConversationKind::Direct, ParticipantRole::Member).is_ok());
        assert!(validate_role_for_kind(ConversationKind::Direct, ParticipantRole::Admin).is_err());
        assert!(validate_role_for_kind(ConversationKind::Group, ParticipantRole::Admin).is_ok());
        assert!(
            validate_role_for_kind(ConversationKind::Group, ParticipantRole::Customer).is_err()
        );
        assert!(
            validate_role_for_kind(ConversationKind::Business, ParticipantRole::Customer).is_ok()
        );
        assert!(
            validate_role_for_kind(ConversationKind::Business, ParticipantRole::Member).is_err()
        );
    }
}
