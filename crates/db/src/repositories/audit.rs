use sqlx::Row;

use helpline_core::audit::AuditEvent;
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, decode_timestamp, AuditLogEntry, AuditLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chatbot_logs (log_type, message, metadata, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.event_type)
        .bind(&event.summary)
        .bind(event.metadata_json().to_string())
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_type(&self, log_type: &str) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, log_type, message, metadata, created_at FROM chatbot_logs
             WHERE log_type = ? ORDER BY id ASC",
        )
        .bind(log_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata: String = row.try_get("metadata").map_err(decode_error)?;
                let created_at: String = row.try_get("created_at").map_err(decode_error)?;
                Ok(AuditLogEntry {
                    id: row.try_get("id").map_err(decode_error)?,
                    log_type: row.try_get("log_type").map_err(decode_error)?,
                    message: row.try_get("message").map_err(decode_error)?,
                    metadata: serde_json::from_str(&metadata)
                        .map_err(|error| RepositoryError::Decode(error.to_string()))?,
                    created_at: decode_timestamp("chatbot_logs.created_at", &created_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use helpline_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
    use helpline_core::domain::user::UserId;

    use super::SqlAuditLogRepository;
    use crate::repositories::AuditLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn recorded_events_keep_metadata() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAuditLogRepository::new(pool);

        let event = AuditEvent::new(
            Some(UserId(4)),
            "wamid-1",
            "escalation.created",
            AuditCategory::Escalation,
            AuditOutcome::Success,
            "Escalation 2 created: repetition",
        )
        .with_metadata("escalation_id", "2");
        repo.record(&event).await.expect("record");

        let entries = repo.list_by_type("escalation.created").await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Escalation 2 created: repetition");
        assert_eq!(entries[0].metadata["escalation_id"], "2");
        assert_eq!(entries[0].metadata["correlation_id"], "wamid-1");
        assert!(repo.list_by_type("conversation.completed").await.expect("list").is_empty());
    }
}
