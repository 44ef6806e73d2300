use std::sync::Arc;

use helpline_agent::{
    ConversationEngine, HttpLlmClient, HttpMailRelay, LlmError, NoopNotifier, NotificationError,
    Notifier, RetentionSweeper,
};
use helpline_channel::{HttpGatewayTransport, PollPolicy, PollingRunner, TransportError};
use helpline_core::address::AddressNormalizer;
use helpline_core::config::{AppConfig, ConfigError, LoadOptions};
use helpline_db::{connect_or_create, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

use crate::service::EngineMessageService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<ConversationEngine>,
    pub runner: Arc<PollingRunner>,
    pub sweeper: Arc<RetentionSweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("notifier setup failed: {0}")]
    Notification(#[from] NotificationError),
    #[error("messaging gateway setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_or_create(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repos = Repositories::sql(db_pool.clone());
    let llm = Arc::new(HttpLlmClient::from_config(&config.llm)?);
    let notifier: Arc<dyn Notifier> = if config.notification.enabled {
        Arc::new(HttpMailRelay::from_config(&config.notification)?)
    } else {
        Arc::new(NoopNotifier)
    };
    info!(
        event_name = "system.bootstrap.collaborators_ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        notifications_enabled = config.notification.enabled,
        "collaborators configured"
    );

    let engine = Arc::new(ConversationEngine::new(
        repos.clone(),
        llm,
        notifier,
        &config.conversation,
        config.notification.support_address.clone(),
    ));
    let transport = Arc::new(HttpGatewayTransport::from_config(&config.channel)?);
    let runner = Arc::new(PollingRunner::new(
        transport,
        Arc::new(EngineMessageService::new(engine.clone())),
        PollPolicy::from_config(&config.channel),
    )
    .with_normalizer(AddressNormalizer::from_config(&config.conversation)));
    let sweeper = Arc::new(RetentionSweeper::from_config(repos, &config.retention));

    Ok(Application { config, db_pool, engine, runner, sweeper })
}
