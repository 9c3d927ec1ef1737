use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::Session;

/// Remote session record store.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, EngineError>;

    /// Insert a new record. A uniqueness/policy rejection surfaces as
    /// [`EngineError::SessionCreationConflict`].
    async fn insert(&self, session: &Session) -> Result<Session, EngineError>;

    async fn delete(&self, id: Uuid) -> Result<(), EngineError>;
}

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, EngineError> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, anon_id, created_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find session {id}: {e}");
            EngineError::db_query(format!("Failed to find session {id}"), e)
        })
    }

    async fn insert(&self, session: &Session) -> Result<Session, EngineError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, anon_id, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.anon_id)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() || db.is_check_violation() {
                    return EngineError::SessionCreationConflict;
                }
            }
            error!("Failed to insert session {}: {e}", session.id);
            EngineError::db_query("Failed to insert session", e)
        })?;
        Ok(session.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete session {id}: {e}");
                EngineError::db_query(format!("Failed to delete session {id}"), e)
            })?;
        Ok(())
    }
}
