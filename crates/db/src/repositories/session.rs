use chrono::{DateTime, Duration, Utc};

use sizer_core::domain::user::SessionKey;
use sizer_core::flows::{SessionState, SessionStore, SessionStoreError};

use super::format_timestamp;
use crate::DbPool;

/// Dialog state persisted as JSON so in-progress flows survive a restart.
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(error: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Backend(error.to_string())
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionState>, SessionStoreError> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT state_json FROM flow_sessions WHERE user_id = ? AND chat_id = ?",
        )
        .bind(key.user_id.0)
        .bind(key.chat_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|error| SessionStoreError::Decode(format!("session {key}: {error}")))
        })
        .transpose()
    }

    async fn save(&self, key: &SessionKey, state: SessionState) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string(&state)
            .map_err(|error| SessionStoreError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO flow_sessions (user_id, chat_id, state_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, chat_id) DO UPDATE SET
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at",
        )
        .bind(key.user_id.0)
        .bind(key.chat_id.0)
        .bind(&json)
        .bind(format_timestamp(state.updated_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<bool, SessionStoreError> {
        let outcome = sqlx::query("DELETE FROM flow_sessions WHERE user_id = ? AND chat_id = ?")
            .bind(key.user_id.0)
            .bind(key.chat_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn sweep_expired(
        &self,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionStoreError> {
        // Fixed-width UTC timestamps compare correctly as text.
        let cutoff = format_timestamp(now - idle_timeout);
        let outcome = sqlx::query("DELETE FROM flow_sessions WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(outcome.rows_affected() as usize)
    }
}
