use chrono::{DateTime, Utc};
use sqlx::Row;

use helpline_core::domain::faq::{FaqEntry, FaqId};
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, FaqRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFaqRepository {
    pool: DbPool,
}

impl SqlFaqRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_faq(row: &sqlx::sqlite::SqliteRow) -> Result<FaqEntry, RepositoryError> {
    Ok(FaqEntry {
        id: FaqId(row.try_get("id").map_err(decode_error)?),
        question: row.try_get("question").map_err(decode_error)?,
        answer: row.try_get("answer").map_err(decode_error)?,
        category: row.try_get("category").map_err(decode_error)?,
    })
}

#[async_trait::async_trait]
impl FaqRepository for SqlFaqRepository {
    async fn find_match(
        &self,
        query: &str,
        min_query_chars: usize,
    ) -> Result<Option<FaqEntry>, RepositoryError> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < min_query_chars {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, question, answer, category FROM faqs
             WHERE TRIM(question) <> ''
               AND (INSTR(LOWER(question), ?) > 0 OR INSTR(?, LOWER(TRIM(question))) > 0)
             ORDER BY id ASC
             LIMIT 1",
        )
        .bind(&query)
        .bind(&query)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_faq).transpose()
    }

    async fn add(
        &self,
        question: &str,
        answer: &str,
        category: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<FaqId, RepositoryError> {
        let at = format_timestamp(at);
        let result = sqlx::query(
            "INSERT INTO faqs (question, answer, category, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(question.trim())
        .bind(answer.trim())
        .bind(category)
        .bind(&at)
        .bind(&at)
        .execute(&self.pool)
        .await?;

        Ok(FaqId(result.last_insert_rowid()))
    }

    async fn list(&self) -> Result<Vec<FaqEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT id, question, answer, category FROM faqs ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_faq).collect()
    }
}
