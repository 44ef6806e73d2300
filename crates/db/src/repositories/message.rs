use sqlx::Row;

use helpline_core::domain::message::{ChatMessage, Direction, MessageId, NewMessage};
use helpline_core::domain::user::UserId;
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, decode_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let user_id: i64 = row.try_get("user_id").map_err(decode_error)?;
    let body: String = row.try_get("body").map_err(decode_error)?;
    let direction: String = row.try_get("direction").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    let direction = Direction::parse(&direction)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message direction `{direction}`")))?;

    Ok(ChatMessage {
        id: MessageId(id),
        user_id: UserId(user_id),
        body,
        direction,
        created_at: decode_timestamp("chat_messages.created_at", &created_at)?,
    })
}

fn oldest_first(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages.reverse();
    messages
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<MessageId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO chat_messages (user_id, body, direction, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message.user_id.0)
        .bind(&message.body)
        .bind(message.direction.as_str())
        .bind(format_timestamp(message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(MessageId(result.last_insert_rowid()))
    }

    async fn recent(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, body, direction, created_at FROM chat_messages
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        Ok(oldest_first(messages))
    }

    async fn count(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn recent_inbound(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, body, direction, created_at FROM chat_messages
             WHERE user_id = ? AND direction = 'user'
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        Ok(oldest_first(messages))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use helpline_core::domain::message::{Direction, NewMessage};

    use super::SqlMessageRepository;
    use crate::repositories::{MessageRepository, SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn recent_returns_bounded_window_oldest_first() {
        let pool = setup().await;
        let users = SqlUserRepository::new(pool.clone());
        let repo = SqlMessageRepository::new(pool);
        let user = users.create("263771234567", Utc::now()).await.expect("user").into_user();

        let start = Utc::now() - Duration::minutes(10);
        for index in 0..5 {
            let at = start + Duration::seconds(index);
            let message = if index % 2 == 0 {
                NewMessage::inbound(user.id, format!("question {index}"), at)
            } else {
                NewMessage::reply(user.id, format!("answer {index}"), at)
            };
            repo.append(message).await.expect("append");
        }

        let recent = repo.recent(user.id, 3).await.expect("recent");
        let bodies: Vec<&str> = recent.iter().map(|message| message.body.as_str()).collect();
        assert_eq!(bodies, vec!["question 2", "answer 3", "question 4"]);
        assert_eq!(recent[1].direction, Direction::FromBot);

        let inbound = repo.recent_inbound(user.id, 3).await.expect("inbound");
        let bodies: Vec<&str> = inbound.iter().map(|message| message.body.as_str()).collect();
        assert_eq!(bodies, vec!["question 0", "question 2", "question 4"]);

        assert_eq!(repo.count(user.id).await.expect("count"), 5);
    }
}
