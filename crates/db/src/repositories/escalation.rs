use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

use helpline_core::domain::escalation::{
    Escalation, EscalationCreated, EscalationId, EscalationSchema, EscalationStatus,
};
use helpline_core::domain::message::MessageId;
use helpline_core::domain::user::UserId;
use helpline_core::errors::DomainError;
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, decode_timestamp, EscalationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEscalationRepository {
    pool: DbPool,
}

impl SqlEscalationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Explains why a guarded status update touched no row.
    async fn rejected_transition(&self, id: EscalationId, to: EscalationStatus) -> RepositoryError {
        let current = sqlx::query_scalar::<_, String>("SELECT status FROM escalations WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await;

        match current {
            Ok(None) => RepositoryError::NotFound(format!("escalation {id}")),
            Ok(Some(raw)) => match EscalationStatus::parse(&raw) {
                Some(from) => DomainError::InvalidEscalationTransition { from, to }.into(),
                None => RepositoryError::Decode(format!("unknown escalation status `{raw}`")),
            },
            Err(error) => error.into(),
        }
    }
}

/// Databases created before `resolved_at` existed reject any statement naming it.
pub(crate) fn is_missing_resolved_at(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            let message = db_error.message();
            message.contains("resolved_at")
                && (message.contains("no such column") || message.contains("has no column"))
        }
        _ => false,
    }
}

fn row_to_escalation(
    row: &sqlx::sqlite::SqliteRow,
    has_resolved_at: bool,
) -> Result<Escalation, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let user_id: i64 = row.try_get("user_id").map_err(decode_error)?;
    let message_id: Option<i64> = row.try_get("message_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let reason: String = row.try_get("reason").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let resolved_at: Option<String> =
        if has_resolved_at { row.try_get("resolved_at").map_err(decode_error)? } else { None };

    let status = EscalationStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown escalation status `{status}`")))?;
    let resolved_at = resolved_at
        .map(|value| decode_timestamp("escalations.resolved_at", &value))
        .transpose()?;

    Ok(Escalation {
        id: EscalationId(id),
        user_id: UserId(user_id),
        message_id: message_id.map(MessageId),
        status,
        reason,
        created_at: decode_timestamp("escalations.created_at", &created_at)?,
        resolved_at,
    })
}

impl SqlEscalationRepository {
    async fn select(
        &self,
        sql: &str,
        bind: i64,
    ) -> Result<(Vec<sqlx::sqlite::SqliteRow>, bool), RepositoryError> {
        let full = format!(
            "SELECT id, user_id, message_id, status, reason, created_at, resolved_at {sql}"
        );
        match sqlx::query(&full).bind(bind).fetch_all(&self.pool).await {
            Ok(rows) => Ok((rows, true)),
            Err(error) if is_missing_resolved_at(&error) => {
                let legacy =
                    format!("SELECT id, user_id, message_id, status, reason, created_at {sql}");
                let rows = sqlx::query(&legacy).bind(bind).fetch_all(&self.pool).await?;
                Ok((rows, false))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
impl EscalationRepository for SqlEscalationRepository {
    async fn create(
        &self,
        user_id: UserId,
        message_id: Option<MessageId>,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> Result<EscalationCreated, RepositoryError> {
        let created_at = format_timestamp(created_at);
        let full = sqlx::query(
            "INSERT INTO escalations (user_id, message_id, status, reason, created_at, resolved_at)
             VALUES (?, ?, 'pending', ?, ?, NULL)",
        )
        .bind(user_id.0)
        .bind(message_id.map(|id| id.0))
        .bind(reason)
        .bind(&created_at)
        .execute(&self.pool)
        .await;

        match full {
            Ok(result) => Ok(EscalationCreated {
                id: EscalationId(result.last_insert_rowid()),
                schema: EscalationSchema::Full,
            }),
            Err(error) if is_missing_resolved_at(&error) => {
                warn!(
                    event_name = "escalation.create.legacy_schema",
                    user_id = user_id.0,
                    "escalations table lacks resolved_at, using minimal insert"
                );
                let result = sqlx::query(
                    "INSERT INTO escalations (user_id, message_id, status, reason, created_at)
                     VALUES (?, ?, 'pending', ?, ?)",
                )
                .bind(user_id.0)
                .bind(message_id.map(|id| id.0))
                .bind(reason)
                .bind(&created_at)
                .execute(&self.pool)
                .await?;

                Ok(EscalationCreated {
                    id: EscalationId(result.last_insert_rowid()),
                    schema: EscalationSchema::LegacyWithoutResolvedAt,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn find(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError> {
        let (rows, has_resolved_at) = self.select("FROM escalations WHERE id = ?", id.0).await?;
        rows.first().map(|row| row_to_escalation(row, has_resolved_at)).transpose()
    }

    async fn original_message(&self, id: EscalationId) -> Result<Option<String>, RepositoryError> {
        let body: Option<Option<String>> = sqlx::query_scalar(
            "SELECT m.body FROM escalations e
             LEFT JOIN chat_messages m ON m.id = e.message_id
             WHERE e.id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        match body {
            Some(body) => Ok(body),
            None => Err(RepositoryError::NotFound(format!("escalation {id}"))),
        }
    }

    async fn update_status(
        &self,
        id: EscalationId,
        status: EscalationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let allowed = status.predecessors();
        if allowed.is_empty() {
            return Err(self.rejected_transition(id, status).await);
        }
        let allowed_list =
            allowed.iter().map(|from| format!("'{}'", from.as_str())).collect::<Vec<_>>().join(", ");

        let resolved_at =
            (status == EscalationStatus::Resolved).then(|| format_timestamp(at));
        let stamped = sqlx::query(&format!(
            "UPDATE escalations SET status = ?, resolved_at = COALESCE(?, resolved_at)
             WHERE id = ? AND status IN ({allowed_list})"
        ))
        .bind(status.as_str())
        .bind(&resolved_at)
        .bind(id.0)
        .execute(&self.pool)
        .await;

        let result = match stamped {
            Ok(result) => result,
            Err(error) if is_missing_resolved_at(&error) => {
                sqlx::query(&format!(
                    "UPDATE escalations SET status = ? WHERE id = ? AND status IN ({allowed_list})"
                ))
                .bind(status.as_str())
                .bind(id.0)
                .execute(&self.pool)
                .await?
            }
            Err(error) => return Err(error.into()),
        };

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, status).await);
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Escalation>, RepositoryError> {
        let (rows, has_resolved_at) =
            self.select("FROM escalations WHERE user_id = ? ORDER BY id ASC", user_id.0).await?;
        rows.iter().map(|row| row_to_escalation(row, has_resolved_at)).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use helpline_core::domain::escalation::{EscalationId, EscalationSchema, EscalationStatus};
    use helpline_core::domain::message::NewMessage;
    use helpline_core::errors::DomainError;

    use super::SqlEscalationRepository;
    use crate::repositories::{
        EscalationRepository, MessageRepository, RepositoryError, SqlMessageRepository,
        SqlUserRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn create_references_message_and_resolves_with_timestamp() {
        let pool = setup().await;
        let user = SqlUserRepository::new(pool.clone())
            .create("263771234567", Utc::now())
            .await
            .expect("user")
            .into_user();
        let message_id = SqlMessageRepository::new(pool.clone())
            .append(NewMessage::inbound(user.id, "my laptop is broken", Utc::now()))
            .await
            .expect("message");
        let repo = SqlEscalationRepository::new(pool);

        let created =
            repo.create(user.id, Some(message_id), "repetition", Utc::now()).await.expect("create");
        assert_eq!(created.schema, EscalationSchema::Full);
        assert_eq!(
            repo.original_message(created.id).await.expect("original").as_deref(),
            Some("my laptop is broken")
        );

        repo.update_status(created.id, EscalationStatus::EmailProvided, Utc::now())
            .await
            .expect("email provided");
        let loaded = repo.find(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, EscalationStatus::EmailProvided);
        assert!(loaded.resolved_at.is_none());

        repo.update_status(created.id, EscalationStatus::Resolved, Utc::now())
            .await
            .expect("resolve");
        let loaded = repo.find(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, EscalationStatus::Resolved);
        assert!(loaded.resolved_at.is_some());
    }

    #[tokio::test]
    async fn resolved_escalation_cannot_move_back() {
        let pool = setup().await;
        let user = SqlUserRepository::new(pool.clone())
            .create("263771234567", Utc::now())
            .await
            .expect("user")
            .into_user();
        let repo = SqlEscalationRepository::new(pool);
        let created = repo.create(user.id, None, "frustration", Utc::now()).await.expect("create");
        repo.update_status(created.id, EscalationStatus::Resolved, Utc::now())
            .await
            .expect("resolve");

        let reopened =
            repo.update_status(created.id, EscalationStatus::EmailProvided, Utc::now()).await;

        assert!(matches!(
            reopened,
            Err(RepositoryError::Domain(DomainError::InvalidEscalationTransition {
                from: EscalationStatus::Resolved,
                to: EscalationStatus::EmailProvided,
            }))
        ));
        let loaded = repo.find(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, EscalationStatus::Resolved);
        assert!(matches!(
            repo.update_status(created.id, EscalationStatus::Pending, Utc::now()).await,
            Err(RepositoryError::Domain(_))
        ));
    }

    #[tokio::test]
    async fn missing_escalation_is_not_found() {
        let pool = setup().await;
        let repo = SqlEscalationRepository::new(pool);

        assert!(repo.find(EscalationId(404)).await.expect("find").is_none());
        assert!(matches!(
            repo.original_message(EscalationId(404)).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.update_status(EscalationId(404), EscalationStatus::Resolved, Utc::now()).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn legacy_schema_without_resolved_at_still_yields_an_id() {
        let pool = setup().await;
        sqlx::query("ALTER TABLE escalations DROP COLUMN resolved_at")
            .execute(&pool)
            .await
            .expect("drop column");
        let user = SqlUserRepository::new(pool.clone())
            .create("263771234567", Utc::now())
            .await
            .expect("user")
            .into_user();
        let repo = SqlEscalationRepository::new(pool);

        let created = repo.create(user.id, None, "frustration", Utc::now()).await.expect("create");
        assert_eq!(created.schema, EscalationSchema::LegacyWithoutResolvedAt);

        repo.update_status(created.id, EscalationStatus::Resolved, Utc::now())
            .await
            .expect("status-only update");
        let loaded = repo.find(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, EscalationStatus::Resolved);
        assert!(loaded.resolved_at.is_none());
        assert_eq!(repo.original_message(created.id).await.expect("original"), None);
    }
}
