use chrono::{DateTime, Utc};

use helpline_core::domain::user::UserId;
use helpline_core::timestamp::format_timestamp;

use super::escalation::is_missing_resolved_at;
use super::{CompletionCounts, PurgeCounts, RepositoryError, RetentionRepository};
use crate::DbPool;

pub struct SqlRetentionRepository {
    pool: DbPool,
}

impl SqlRetentionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RetentionRepository for SqlRetentionRepository {
    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeCounts, RepositoryError> {
        let cutoff = format_timestamp(cutoff);
        let mut tx = self.pool.begin().await?;

        let escalations = sqlx::query("DELETE FROM escalations WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let messages = sqlx::query("DELETE FROM chat_messages WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(PurgeCounts { messages, escalations })
    }

    async fn purge_resolved_escalations(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM escalations WHERE status = 'resolved'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_stale_conversation_states(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM user_states WHERE updated_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn complete_conversation(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<CompletionCounts, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let messages_deleted = sqlx::query("DELETE FROM chat_messages WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let stamped = sqlx::query(
            "UPDATE escalations SET status = 'resolved', resolved_at = ?
             WHERE user_id = ? AND status = 'pending'",
        )
        .bind(format_timestamp(at))
        .bind(user_id.0)
        .execute(&mut *tx)
        .await;
        let escalations_resolved = match stamped {
            Ok(result) => result.rows_affected(),
            Err(error) if is_missing_resolved_at(&error) => sqlx::query(
                "UPDATE escalations SET status = 'resolved' WHERE user_id = ? AND status = 'pending'",
            )
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            Err(error) => return Err(error.into()),
        };

        sqlx::query("DELETE FROM user_states WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CompletionCounts { messages_deleted, escalations_resolved })
    }
}
