use std::time::Duration;

use helpline_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let database_url = if database_url == ":memory:" { "sqlite::memory:" } else { database_url };
    // Each in-memory connection is a separate database.
    let max_connections =
        if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Creates the database file on first use.
pub async fn connect_or_create(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    if let Some(path) = config.url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or_default();
        if !path.is_empty() && !std::path::Path::new(path).exists() {
            let separator = if config.url.contains('?') { '&' } else { '?' };
            let url = format!("{}{}mode=rwc", config.url, separator);
            return connect_with_settings(&url, config.max_connections, config.timeout_secs).await;
        }
    }
    connect_with_config(config).await
}
