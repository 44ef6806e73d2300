use chrono::{DateTime, Utc};
use sqlx::Row;

use helpline_core::domain::conversation::{ConversationState, StateTag};
use helpline_core::domain::user::UserId;
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, decode_timestamp, to_u32, ConversationStateRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationStateRepository {
    pool: DbPool,
}

impl SqlConversationStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationState, RepositoryError> {
    let user_id: i64 = row.try_get("user_id").map_err(decode_error)?;
    let state: String = row.try_get("state").map_err(decode_error)?;
    let data: Option<String> = row.try_get("data").map_err(decode_error)?;
    let failure_count: i64 = row.try_get("failure_count").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(ConversationState {
        user_id: UserId(user_id),
        tag: StateTag::parse(&state),
        payload: data,
        failure_count: to_u32(failure_count),
        updated_at: decode_timestamp("user_states.updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ConversationStateRepository for SqlConversationStateRepository {
    async fn get(&self, user_id: UserId) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, state, data, failure_count, updated_at FROM user_states
             WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn set_state(
        &self,
        user_id: UserId,
        tag: StateTag,
        payload: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_states (user_id, state, data, failure_count, updated_at)
             VALUES (?, ?, ?, 0, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 state = excluded.state,
                 data = excluded.data,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(tag.as_str())
        .bind(payload)
        .bind(format_timestamp(at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE user_states SET state = 'none', data = NULL, updated_at = ? WHERE user_id = ?",
        )
        .bind(format_timestamp(at))
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn failure_count(&self, user_id: UserId) -> Result<u32, RepositoryError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT failure_count FROM user_states WHERE user_id = ?")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;

        Ok(count.map(to_u32).unwrap_or(0))
    }

    async fn set_failure_count(
        &self,
        user_id: UserId,
        count: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_states (user_id, state, data, failure_count, updated_at)
             VALUES (?, 'none', NULL, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 failure_count = excluded.failure_count,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(i64::from(count))
        .bind(format_timestamp(at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
