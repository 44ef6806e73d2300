use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use helpline_core::audit::AuditEvent;
use helpline_core::domain::conversation::{ConversationState, StateTag};
use helpline_core::domain::escalation::{
    Escalation, EscalationCreated, EscalationId, EscalationStatus,
};
use helpline_core::domain::faq::{FaqEntry, FaqId};
use helpline_core::domain::message::{ChatMessage, MessageId, NewMessage};
use helpline_core::domain::user::{SupportContact, User, UserId};
use helpline_core::errors::{ApplicationError, DomainError};
use helpline_core::timestamp::parse_timestamp;

use crate::DbPool;

pub mod audit;
pub mod escalation;
pub mod faq;
pub mod memory;
pub mod message;
pub mod retention;
pub mod state;
pub mod user;

pub use audit::SqlAuditLogRepository;
pub use escalation::SqlEscalationRepository;
pub use faq::SqlFaqRepository;
pub use memory::InMemoryStore;
pub use message::SqlMessageRepository;
pub use retention::SqlRetentionRepository;
pub use state::SqlConversationStateRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) | RepositoryError::NotFound(message) => {
                Self::DataIntegrity(message)
            }
            RepositoryError::Domain(error) => Self::DataIntegrity(error.to_string()),
        }
    }
}

/// Duplicate addresses are an expected outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created(User),
    AlreadyExists(User),
}

impl CreateUserOutcome {
    pub fn into_user(self) -> User {
        match self {
            Self::Created(user) | Self::AlreadyExists(user) => user,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub messages: u64,
    pub escalations: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionCounts {
    pub messages_deleted: u64,
    pub escalations_resolved: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditLogEntry {
    pub id: i64,
    pub log_type: String,
    pub message: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    /// New users start with `awaiting_onboarding = true`.
    async fn create(
        &self,
        address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<CreateUserOutcome, RepositoryError>;
    /// Stores the name and clears the onboarding flag.
    async fn update_name(&self, id: UserId, name: &str) -> Result<(), RepositoryError>;
    async fn update_email(&self, id: UserId, email: &str) -> Result<(), RepositoryError>;
    async fn clear_onboarding_flag(&self, id: UserId) -> Result<(), RepositoryError>;
    async fn mark_assistant(&self, id: UserId, is_assistant: bool) -> Result<(), RepositoryError>;
    async fn list_support_contacts(&self) -> Result<Vec<SupportContact>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<MessageId, RepositoryError>;
    /// Most recent `limit` messages, oldest first.
    async fn recent(&self, user_id: UserId, limit: u32)
        -> Result<Vec<ChatMessage>, RepositoryError>;
    async fn count(&self, user_id: UserId) -> Result<i64, RepositoryError>;
    /// Most recent `limit` inbound messages, oldest first.
    async fn recent_inbound(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    async fn create(
        &self,
        user_id: UserId,
        message_id: Option<MessageId>,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> Result<EscalationCreated, RepositoryError>;
    async fn find(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError>;
    /// Body of the message that triggered the escalation, if it still exists.
    async fn original_message(&self, id: EscalationId) -> Result<Option<String>, RepositoryError>;
    async fn update_status(
        &self,
        id: EscalationId,
        status: EscalationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Escalation>, RepositoryError>;
}

#[async_trait]
pub trait ConversationStateRepository: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<ConversationState>, RepositoryError>;
    async fn set_state(
        &self,
        user_id: UserId,
        tag: StateTag,
        payload: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    /// Resets the tag and payload. The failure counter is left as is.
    async fn clear(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
    /// Zero when no state row exists.
    async fn failure_count(&self, user_id: UserId) -> Result<u32, RepositoryError>;
    async fn set_failure_count(
        &self,
        user_id: UserId,
        count: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FaqRepository: Send + Sync {
    async fn find_match(
        &self,
        query: &str,
        min_query_chars: usize,
    ) -> Result<Option<FaqEntry>, RepositoryError>;
    async fn add(
        &self,
        question: &str,
        answer: &str,
        category: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<FaqId, RepositoryError>;
    async fn list(&self) -> Result<Vec<FaqEntry>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    async fn list_by_type(&self, log_type: &str) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait RetentionRepository: Send + Sync {
    /// Deletes messages and escalations created before `cutoff`.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>)
        -> Result<PurgeCounts, RepositoryError>;
    async fn purge_resolved_escalations(&self) -> Result<u64, RepositoryError>;
    async fn purge_stale_conversation_states(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
    /// Deletes the user's messages, resolves pending escalations and drops the
    /// conversation state in one unit.
    async fn complete_conversation(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<CompletionCounts, RepositoryError>;
}

/// Storage handle injected into the engine, handler and sweeper.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub escalations: Arc<dyn EscalationRepository>,
    pub states: Arc<dyn ConversationStateRepository>,
    pub faqs: Arc<dyn FaqRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub retention: Arc<dyn RetentionRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            escalations: Arc::new(SqlEscalationRepository::new(pool.clone())),
            states: Arc::new(SqlConversationStateRepository::new(pool.clone())),
            faqs: Arc::new(SqlFaqRepository::new(pool.clone())),
            audit: Arc::new(SqlAuditLogRepository::new(pool.clone())),
            retention: Arc::new(SqlRetentionRepository::new(pool)),
        }
    }

    pub fn in_memory(store: InMemoryStore) -> Self {
        let shared = Arc::new(store);
        Self {
            users: shared.clone(),
            messages: shared.clone(),
            escalations: shared.clone(),
            states: shared.clone(),
            faqs: shared.clone(),
            audit: shared.clone(),
            retention: shared,
        }
    }
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    parse_timestamp(value)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {value}")))
}

pub(crate) fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
