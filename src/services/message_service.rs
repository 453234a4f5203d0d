//! The send/edit/delete pipeline. Both transports (HTTP handlers and socket
//! sessions) enter through here; nothing else appends user messages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::require_participant;
use crate::models::{Message, MessageContent, MessageKind, SYSTEM_USER_ID};
use crate::store::Store;
use crate::websocket::frames::OutboundFrame;
use crate::websocket::RoomRegistry;

/// Per-conversation serialization for persist + publish. Holding the
/// conversation's lock across both steps guarantees subscribers observe
/// messages in committed-id order.
#[derive(Default)]
pub struct SendLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct MessagePipeline {
    store: Store,
    registry: RoomRegistry,
    locks: Arc<SendLocks>,
}

impl MessagePipeline {
    pub fn new(store: Store, registry: RoomRegistry, locks: Arc<SendLocks>) -> Self {
        Self { store, registry, locks }
    }

    /// Authorize -> validate -> persist -> publish. Publish only happens
    /// after the transaction commits, and runs to completion once it does.
    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender_id: &str,
        raw_content: &str,
        kind: Option<&str>,
    ) -> AppResult<Message> {
        // Muted participants may still send; mute only suppresses
        // notifications downstream.
        require_participant(&self.store, conversation_id, sender_id).await?;

        let content = MessageContent::new(raw_content)?;
        let kind = match kind {
            Some(k) => MessageKind::parse_user_sendable(k)?,
            None => MessageKind::Text,
        };

        let _guard = self.locks.acquire(conversation_id).await;
        let message = self
            .store
            .insert_message(conversation_id, sender_id, &content, kind)
            .await?;
        self.publish_new(&message).await;
        Ok(message)
    }

    /// Broadcast an already-persisted message (system notices emitted inside
    /// the conversation service's transactions). The caller holds the
    /// conversation's send lock.
    pub async fn publish_new(&self, message: &Message) {
        self.registry
            .broadcast(
                message.conversation_id,
                &OutboundFrame::NewMessage {
                    message_id: message.id,
                    conversation_id: message.conversation_id,
                    sender_id: message.sender_id.clone(),
                    content: message.content.clone(),
                    message_type: message.kind,
                    sent_at: message.sent_at,
                },
            )
            .await;
    }

    /// Sender-only, within 24 h of `sent_at`, never on tombstones or system
    /// messages.
    pub async fn edit(
        &self,
        message_id: i64,
        caller: &str,
        raw_content: &str,
    ) -> AppResult<Message> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound)?;

        if message.sender_id != caller {
            return Err(AppError::NotAuthorized);
        }
        if message.is_deleted() {
            return Err(AppError::AlreadyDeleted);
        }
        if message.kind == MessageKind::System {
            return Err(AppError::EditForbiddenKind);
        }
        let now = Utc::now();
        if !message.editable_at(now) {
            return Err(AppError::EditWindowExpired);
        }

        let content = MessageContent::new(raw_content)?;

        let _guard = self.locks.acquire(message.conversation_id).await;
        self.store.update_message_content(message_id, &content).await?;
        self.registry
            .broadcast(
                message.conversation_id,
                &OutboundFrame::MessageEdited {
                    message_id,
                    conversation_id: message.conversation_id,
                    new_content: content.as_str().to_string(),
                    edited_at: now,
                },
            )
            .await;

        Ok(Message { content: content.into_inner(), ..message })
    }

    /// Sender (or the system identity), within 90 d of `sent_at`. Stamps the
    /// tombstone; the conversation's last-message back reference is left
    /// pointing at it.
    pub async fn delete(&self, message_id: i64, caller: &str) -> AppResult<()> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound)?;

        if message.sender_id != caller && caller != SYSTEM_USER_ID {
            return Err(AppError::NotAuthorized);
        }
        if message.is_deleted() {
            return Err(AppError::AlreadyDeleted);
        }
        if !message.deletable_at(Utc::now()) {
            return Err(AppError::DeleteWindowExpired);
        }

        let _guard = self.locks.acquire(message.conversation_id).await;
        self.store.soft_delete_message(message_id).await?;
        self.registry
            .broadcast(
                message.conversation_id,
                &OutboundFrame::MessageDeleted {
                    message_id,
                    conversation_id: message.conversation_id,
                },
            )
            .await;

        Ok(())
    }

    /// Typing indicators: participant-gated pure fan-out, never persisted.
    pub async fn typing(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        is_typing: bool,
    ) -> AppResult<()> {
        require_participant(&self.store, conversation_id, user_id).await?;
        self.registry
            .broadcast(
                conversation_id,
                &OutboundFrame::UserTyping {
                    conversation_id,
                    user_id: user_id.to_string(),
                    is_typing,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_lock_serializes_one_conversation() {
        let locks = Arc::new(SendLocks::new());
        let conversation = Uuid::new_v4();

        let guard = locks.acquire(conversation).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(conversation).await;
            })
        };

        // The second acquire must wait until the first guard drops.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should proceed once the lock is released")
            .unwrap();
    }

    #[tokio::test]
    async fn different_conversations_do_not_contend() {
        let locks = SendLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        // Acquiring a different conversation's lock completes immediately.
        tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4()))
            .await
            .expect("unrelated conversation must not block");
    }
}
