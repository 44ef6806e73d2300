use chrono::{DateTime, Utc};
use sqlx::Row;

use helpline_core::domain::user::{SupportContact, User, UserId};
use helpline_core::timestamp::format_timestamp;

use super::{decode_error, decode_timestamp, CreateUserOutcome, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str =
    "id, address, name, email, is_assistant, awaiting_onboarding, created_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let address: String = row.try_get("address").map_err(decode_error)?;
    let name: Option<String> = row.try_get("name").map_err(decode_error)?;
    let email: Option<String> = row.try_get("email").map_err(decode_error)?;
    let is_assistant: bool = row.try_get("is_assistant").map_err(decode_error)?;
    let awaiting_onboarding: bool = row.try_get("awaiting_onboarding").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(User {
        id: UserId(id),
        address,
        name,
        email,
        is_assistant,
        awaiting_onboarding,
        created_at: decode_timestamp("users.created_at", &created_at)?,
    })
}

fn ensure_updated(result: sqlx::sqlite::SqliteQueryResult, id: UserId) -> Result<(), RepositoryError> {
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("user {id}")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_address(&self, address: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE address = ?"))
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn create(
        &self,
        address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<CreateUserOutcome, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO users (address, awaiting_onboarding, is_assistant, created_at)
             VALUES (?, 1, 0, ?)
             ON CONFLICT(address) DO NOTHING",
        )
        .bind(address)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        let user = self
            .find_by_address(address)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("user with address {address}")))?;

        if inserted.rows_affected() == 0 {
            Ok(CreateUserOutcome::AlreadyExists(user))
        } else {
            Ok(CreateUserOutcome::Created(user))
        }
    }

    async fn update_name(&self, id: UserId, name: &str) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE users SET name = ?, awaiting_onboarding = 0 WHERE id = ?")
                .bind(name)
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        ensure_updated(result, id)
    }

    async fn update_email(&self, id: UserId, email: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET email = ? WHERE id = ?")
            .bind(email)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        ensure_updated(result, id)
    }

    async fn clear_onboarding_flag(&self, id: UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET awaiting_onboarding = 0 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        ensure_updated(result, id)
    }

    async fn mark_assistant(&self, id: UserId, is_assistant: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET is_assistant = ? WHERE id = ?")
            .bind(is_assistant)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        ensure_updated(result, id)
    }

    async fn list_support_contacts(&self) -> Result<Vec<SupportContact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT name, address FROM users
             WHERE is_assistant = 1 AND name IS NOT NULL AND TRIM(name) <> ''
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SupportContact {
                    name: row.try_get("name").map_err(decode_error)?,
                    address: row.try_get("address").map_err(decode_error)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::SqlUserRepository;
    use crate::repositories::{CreateUserOutcome, RepositoryError, UserRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlUserRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserRepository::new(pool)
    }

    #[tokio::test]
    async fn create_starts_onboarding_and_reports_duplicates() {
        let repo = setup().await;

        let first = repo.create("263771234567", Utc::now()).await.expect("create");
        let user = match first {
            CreateUserOutcome::Created(user) => user,
            other => panic!("expected new user, got {other:?}"),
        };
        assert!(user.awaiting_onboarding);
        assert!(user.name.is_none());

        let second = repo.create("263771234567", Utc::now()).await.expect("create again");
        assert_eq!(second, CreateUserOutcome::AlreadyExists(user.clone()));
    }

    #[tokio::test]
    async fn update_name_clears_onboarding_flag() {
        let repo = setup().await;
        let user = repo.create("263771234567", Utc::now()).await.expect("create").into_user();

        repo.update_name(user.id, "Rudo").await.expect("update name");
        repo.update_email(user.id, "rudo@example.com").await.expect("update email");

        let loaded = repo.find_by_address("263771234567").await.expect("find").expect("exists");
        assert_eq!(loaded.name.as_deref(), Some("Rudo"));
        assert_eq!(loaded.email.as_deref(), Some("rudo@example.com"));
        assert!(!loaded.awaiting_onboarding);
    }

    #[tokio::test]
    async fn updating_missing_user_is_not_found() {
        let repo = setup().await;
        let error = repo.update_email(helpline_core::UserId(99), "x@example.com").await;
        assert!(matches!(error, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn support_contacts_are_named_assistants() {
        let repo = setup().await;
        let agent = repo.create("263770000001", Utc::now()).await.expect("create").into_user();
        let unnamed = repo.create("263770000002", Utc::now()).await.expect("create").into_user();
        let customer = repo.create("263770000003", Utc::now()).await.expect("create").into_user();

        repo.update_name(agent.id, "Farai").await.expect("name");
        repo.update_name(customer.id, "Chipo").await.expect("name");
        repo.mark_assistant(agent.id, true).await.expect("mark");
        repo.mark_assistant(unnamed.id, true).await.expect("mark");

        let contacts = repo.list_support_contacts().await.expect("contacts");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Farai");
        assert_eq!(contacts[0].address, "263770000001");
    }
}
