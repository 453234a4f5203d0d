//! Single persistence layer over Postgres. All multi-row consistency
//! boundaries (message send, conversation creation, participant removal with
//! its system notice) are transactions here; callers never compose their own.

use crate::error::{is_transient, AppError, AppResult};
use crate::models::{
    Conversation, ConversationKind, Message, MessageContent, MessageKind, Participant,
    ParticipantRole, SYSTEM_USER_ID,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Retry the query expression once when the first attempt fails with a
/// transient connectivity error.
macro_rules! retry_transient {
    ($query:expr) => {{
        match $query.await {
            Err(err) if is_transient(&err) => {
                tracing::warn!(error = %err, "transient store failure, retrying once");
                $query.await
            }
            other => other,
        }
    }};
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// A conversation row joined with the requesting user's participant row,
/// as needed for chat-list rendering.
#[derive(Debug, Clone)]
pub struct ConversationForUser {
    pub conversation: Conversation,
    pub role: ParticipantRole,
    pub is_muted: bool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Liveness probe for the detailed health endpoint.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn insert_user(&self, user_id: &str) -> AppResult<()> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// At most one direct conversation contains exactly this user pair; the
    /// two-participant invariant on direct conversations makes the double
    /// EXISTS sufficient.
    pub async fn find_direct_conversation(&self, u1: &str, u2: &str) -> AppResult<Option<Uuid>> {
        let row = retry_transient!(sqlx::query(
            r#"
            SELECT c.id
            FROM conversations c
            WHERE c.kind = 'direct'
              AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = $1)
              AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = $2)
            LIMIT 1
            "#,
        )
        .bind(u1)
        .bind(u2)
        .fetch_optional(&self.pool))?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Conversation row plus all participant rows, one transaction.
    pub async fn create_conversation_with_participants(
        &self,
        kind: ConversationKind,
        title: Option<&str>,
        participants: &[(String, ParticipantRole)],
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO conversations (id, kind, title) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(kind.as_str())
            .bind(title)
            .execute(&mut *tx)
            .await?;

        for (user_id, role) in participants {
            sqlx::query(
                "INSERT INTO participants (conversation_id, user_id, role) VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let row = retry_transient!(sqlx::query(
            "SELECT id, kind, title, created_at, last_activity, last_message_id \
             FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool))?;
        row.map(|r| conversation_from_row(&r)).transpose()
    }

    pub async fn list_conversations_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationForUser>> {
        let rows = retry_transient!(sqlx::query(
            r#"
            SELECT c.id, c.kind, c.title, c.created_at, c.last_activity, c.last_message_id,
                   p.role, p.is_muted
            FROM conversations c
            JOIN participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.last_activity DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool))?;

        rows.iter()
            .map(|r| {
                Ok(ConversationForUser {
                    conversation: conversation_from_row(r)?,
                    role: ParticipantRole::parse(r.get("role"))?,
                    is_muted: r.get("is_muted"),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    pub async fn get_participant(
        &self,
        conversation_id: Uuid,
        user_id: &str,
    ) -> AppResult<Option<Participant>> {
        let row = retry_transient!(sqlx::query(
            "SELECT conversation_id, user_id, role, is_muted, last_read_message_id, joined_at \
             FROM participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool))?;
        row.map(|r| participant_from_row(&r)).transpose()
    }

    pub async fn list_participants(&self, conversation_id: Uuid) -> AppResult<Vec<Participant>> {
        let rows = retry_transient!(sqlx::query(
            "SELECT conversation_id, user_id, role, is_muted, last_read_message_id, joined_at \
             FROM participants WHERE conversation_id = $1 ORDER BY joined_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool))?;
        rows.iter().map(participant_from_row).collect()
    }

    pub async fn count_participants(&self, conversation_id: Uuid) -> AppResult<i64> {
        let count = retry_transient!(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool))?;
        Ok(count)
    }

    /// Participant insert plus the system "joined" notice, one transaction.
    /// Returns the persisted notice for broadcast.
    pub async fn add_participant_with_notice(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        role: ParticipantRole,
        notice: &MessageContent,
    ) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO participants (conversation_id, user_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(AppError::StoreConflict("already a participant".into()));
        }

        let message =
            insert_message_tx(&mut tx, conversation_id, SYSTEM_USER_ID, notice, MessageKind::System)
                .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Participant removal plus the system "left" notice, one transaction.
    pub async fn remove_participant_with_notice(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        notice: &MessageContent,
    ) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            return Err(AppError::ParticipantNotFound);
        }

        let message =
            insert_message_tx(&mut tx, conversation_id, SYSTEM_USER_ID, notice, MessageKind::System)
                .await?;

        tx.commit().await?;
        Ok(message)
    }

    pub async fn update_role(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        role: ParticipantRole,
    ) -> AppResult<()> {
        let updated =
            sqlx::query("UPDATE participants SET role = $3 WHERE conversation_id = $1 AND user_id = $2")
                .bind(conversation_id)
                .bind(user_id)
                .bind(role.as_str())
                .execute(&self.pool)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::ParticipantNotFound);
        }
        Ok(())
    }

    pub async fn set_muted(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        muted: bool,
    ) -> AppResult<()> {
        let updated = sqlx::query(
            "UPDATE participants SET is_muted = $3 WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(muted)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::ParticipantNotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// The send transaction: message insert plus the conversation's
    /// last-message/last-activity update commit together or not at all.
    pub async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: &str,
        content: &MessageContent,
        kind: MessageKind,
    ) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;
        let message = insert_message_tx(&mut tx, conversation_id, sender_id, content, kind).await?;
        tx.commit().await?;
        Ok(message)
    }

    pub async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        let row = retry_transient!(sqlx::query(
            "SELECT id, conversation_id, sender_id, content, kind, sent_at, deleted_at \
             FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool))?;
        row.map(|r| message_from_row(&r)).transpose()
    }

    pub async fn update_message_content(&self, id: i64, content: &MessageContent) -> AppResult<()> {
        let updated = sqlx::query("UPDATE messages SET content = $2 WHERE id = $1")
            .bind(id)
            .bind(content.as_str())
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::MessageNotFound);
        }
        Ok(())
    }

    /// Stamps the tombstone. `last_message_id` is intentionally left in
    /// place; reads surface the tombstone until retention hard-deletes it.
    pub async fn soft_delete_message(&self, id: i64) -> AppResult<DateTime<Utc>> {
        let row = sqlx::query(
            "UPDATE messages SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL \
             RETURNING deleted_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(r.get("deleted_at")),
            None => Err(AppError::AlreadyDeleted),
        }
    }

    /// Pages newest-first by `(sent_at DESC, id DESC)`; tombstones are
    /// included so clients can render "message deleted" in place. Fetches
    /// one row past `limit` so the caller can derive `has_more`.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before_id: Option<i64>,
    ) -> AppResult<Vec<Message>> {
        let rows = retry_transient!(sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, content, kind, sent_at, deleted_at
            FROM messages
            WHERE conversation_id = $1
              AND ($2::bigint IS NULL OR id < $2)
            ORDER BY sent_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool))?;
        rows.iter().map(message_from_row).collect()
    }

    /// Count of non-deleted messages strictly newer than the cursor.
    pub async fn unread_count(
        &self,
        conversation_id: Uuid,
        last_read_id: Option<i64>,
    ) -> AppResult<i64> {
        let count = retry_transient!(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND deleted_at IS NULL AND id > $2",
        )
        .bind(conversation_id)
        .bind(last_read_id.unwrap_or(0))
        .fetch_one(&self.pool))?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Read cursor
    // ------------------------------------------------------------------

    /// Monotone: the cursor only moves forward. Returns whether it moved.
    pub async fn update_last_read(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        message_id: i64,
    ) -> AppResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE participants SET last_read_message_id = $3
            WHERE conversation_id = $1 AND user_id = $2
              AND (last_read_message_id IS NULL OR last_read_message_id < $3)
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Hard-deletes tombstones whose `deleted_at` is older than `cutoff`,
    /// then repoints any conversation whose last-message back reference was
    /// cleared by the cascade to its newest surviving message. Returns the
    /// number of rows removed.
    pub async fn hard_delete_expired_tombstones(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        let affected: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM messages WHERE deleted_at IS NOT NULL AND deleted_at < $1 \
             RETURNING conversation_id",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        let deleted = affected.len() as u64;

        if !affected.is_empty() {
            // The FK ON DELETE SET NULL already cleared dangling back
            // references; repoint them where a message survives.
            sqlx::query(
                r#"
                UPDATE conversations c
                SET last_message_id = sub.max_id
                FROM (
                    SELECT conversation_id, MAX(id) AS max_id
                    FROM messages
                    GROUP BY conversation_id
                ) sub
                WHERE c.id = sub.conversation_id
                  AND c.last_message_id IS NULL
                  AND c.id = ANY($1)
                "#,
            )
            .bind(&affected)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }
}

/// Shared by every path that appends a message: insert plus the
/// last-message/last-activity bump inside the caller's transaction, so
/// invariant "last_activity equals the newest sent_at" holds at commit.
async fn insert_message_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    conversation_id: Uuid,
    sender_id: &str,
    content: &MessageContent,
    kind: MessageKind,
) -> AppResult<Message> {
    let row = sqlx::query(
        "INSERT INTO messages (conversation_id, sender_id, content, kind) \
         VALUES ($1, $2, $3, $4) RETURNING id, sent_at",
    )
    .bind(conversation_id)
    .bind(sender_id)
    .bind(content.as_str())
    .bind(kind.as_str())
    .fetch_one(&mut **tx)
    .await?;
    let id: i64 = row.get("id");
    let sent_at: DateTime<Utc> = row.get("sent_at");

    let updated = sqlx::query(
        "UPDATE conversations SET last_message_id = $2, last_activity = $3 WHERE id = $1",
    )
    .bind(conversation_id)
    .bind(id)
    .bind(sent_at)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::ConversationNotFound);
    }

    Ok(Message {
        id,
        conversation_id,
        sender_id: sender_id.to_string(),
        content: content.as_str().to_string(),
        kind,
        sent_at,
        deleted_at: None,
    })
}

fn conversation_from_row(row: &PgRow) -> AppResult<Conversation> {
    Ok(Conversation {
        id: row.get("id"),
        kind: ConversationKind::parse(row.get("kind"))?,
        title: row.get("title"),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
        last_message_id: row.get("last_message_id"),
    })
}

fn participant_from_row(row: &PgRow) -> AppResult<Participant> {
    Ok(Participant {
        conversation_id: row.get("conversation_id"),
        user_id: row.get("user_id"),
        role: ParticipantRole::parse(row.get("role"))?,
        is_muted: row.get("is_muted"),
        last_read_message_id: row.get("last_read_message_id"),
        joined_at: row.get("joined_at"),
    })
}

fn message_from_row(row: &PgRow) -> AppResult<Message> {
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        kind: MessageKind::parse(row.get("kind"))?,
        sent_at: row.get("sent_at"),
        deleted_at: row.get("deleted_at"),
    })
}
