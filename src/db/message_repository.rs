use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{Message, MessageOrigin, SenderRole};

/// Remote message record store. Reads come back ordered by `created_at`
/// ascending; writes are inserts only — rows are never mutated.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_session_id(&self, session_id: Uuid) -> Result<Vec<Message>, EngineError>;

    async fn insert(&self, message: &Message) -> Result<Message, EngineError>;
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn find_by_session_id(&self, session_id: Uuid) -> Result<Vec<Message>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, session_id, sender_role, content, created_at
             FROM messages
             WHERE session_id = $1
             ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for session {session_id}: {e}");
            EngineError::db_query(
                format!("Failed to fetch messages for session {session_id}"),
                e,
            )
        })?;

        rows.into_iter()
            .map(|row: sqlx::postgres::PgRow| {
                use sqlx::Row;
                let role_str: String = row
                    .try_get("sender_role")
                    .map_err(|e| EngineError::db_query("Failed to read sender_role", e))?;
                let sender_role = SenderRole::try_from(role_str)
                    .map_err(|e| EngineError::Unexpected(format!("Bad message row: {e}")))?;
                Ok(Message {
                    id: row
                        .try_get("id")
                        .map_err(|e| EngineError::db_query("Failed to read id", e))?,
                    session_id: row
                        .try_get("session_id")
                        .map_err(|e| EngineError::db_query("Failed to read session_id", e))?,
                    sender_role,
                    content: row
                        .try_get("content")
                        .map_err(|e| EngineError::db_query("Failed to read content", e))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| EngineError::db_query("Failed to read created_at", e))?,
                    origin: MessageOrigin::Confirmed,
                })
            })
            .collect()
    }

    async fn insert(&self, message: &Message) -> Result<Message, EngineError> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, sender_role, content, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender_role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert message {}: {e}", message.id);
            EngineError::db_query("Failed to insert message", e)
        })?;
        Ok(message.clone())
    }
}
