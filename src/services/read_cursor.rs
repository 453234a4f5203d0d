use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::require_participant;
use crate::store::Store;

#[derive(Clone)]
pub struct ReadCursorService {
    store: Store,
}

impl ReadCursorService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Advance the caller's read cursor. The cursor is monotone: attempts to
    /// move it backwards are accepted but change nothing. Returns whether it
    /// moved.
    pub async fn mark_read(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        message_id: i64,
    ) -> AppResult<bool> {
        require_participant(&self.store, conversation_id, user_id).await?;

        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound)?;
        if message.conversation_id != conversation_id {
            return Err(AppError::MessageNotFound);
        }

        self.store.update_last_read(conversation_id, user_id, message_id).await
    }

    /// Non-deleted messages strictly newer than the stored cursor.
    pub async fn unread_for(&self, user_id: &str, conversation_id: Uuid) -> AppResult<i64> {
        let participant = require_participant(&self.store, conversation_id, user_id).await?;
        self.store
            .unread_count(conversation_id, participant.last_read_message_id)
            .await
    }
}
