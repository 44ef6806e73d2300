//! Scripted collaborators and broken storage for engine tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use helpline_core::audit::AuditEvent;
use helpline_core::domain::conversation::{ConversationState, StateTag};
use helpline_core::domain::escalation::{
    Escalation, EscalationCreated, EscalationId, EscalationStatus,
};
use helpline_core::domain::faq::{FaqEntry, FaqId};
use helpline_core::domain::message::{ChatMessage, MessageId, NewMessage};
use helpline_core::domain::user::{SupportContact, User, UserId};
use helpline_db::repositories::{
    AuditLogEntry, AuditLogRepository, CompletionCounts, ConversationStateRepository,
    CreateUserOutcome, EscalationRepository, FaqRepository, MessageRepository, PurgeCounts,
    RepositoryError, RetentionRepository, UserRepository,
};
use helpline_db::Repositories;

use crate::llm::{LlmClient, LlmError};
use crate::notify::{NotificationError, Notifier, TicketDetails};

/// Replays queued completions, then falls back to `default`.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    default: Result<String, LlmError>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn always(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(script: Vec<Result<String, LlmError>>, default: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default: Ok(default.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Err(LlmError::Timeout(30)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().await.push(prompt.to_string());
        let next = self.script.lock().await.pop_front();
        next.unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
    tickets: Mutex<Vec<TicketDetails>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    /// `(kind, recipient)` pairs in send order.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn last_ticket(&self) -> Option<TicketDetails> {
        self.tickets.lock().await.last().cloned()
    }

    async fn record(
        &self,
        kind: &str,
        recipient: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Delivery("relay unreachable".to_string()));
        }
        self.sent.lock().await.push((kind.to_string(), recipient.to_string()));
        self.tickets.lock().await.push(ticket.clone());
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_ticket(
        &self,
        staff_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        self.record("ticket", staff_address, ticket).await
    }

    async fn send_confirmation(
        &self,
        user_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        self.record("confirmation", user_address, ticket).await
    }
}

/// Replaces message and state storage with a store that always fails.
pub struct FailingReads;

impl FailingReads {
    pub fn wrap(repos: Repositories) -> Repositories {
        let broken = Arc::new(BrokenStore);
        Repositories { messages: broken.clone(), states: broken, ..repos }
    }
}

/// Replaces every repository the escalation path writes to.
pub struct FailingWrites;

impl FailingWrites {
    pub fn wrap(repos: Repositories) -> Repositories {
        let broken = Arc::new(BrokenStore);
        Repositories {
            messages: broken.clone(),
            escalations: broken.clone(),
            states: broken.clone(),
            audit: broken.clone(),
            retention: broken,
            ..repos
        }
    }
}

/// Fails the FAQ lookup and the AI-path message reads after a user exists.
pub struct FailingEverything;

impl FailingEverything {
    pub fn wrap(repos: Repositories) -> Repositories {
        let broken = Arc::new(BrokenStore);
        Repositories {
            messages: broken.clone(),
            escalations: broken.clone(),
            states: broken.clone(),
            faqs: broken.clone(),
            audit: broken.clone(),
            retention: broken,
            ..repos
        }
    }
}

pub struct BrokenStore;

fn outage() -> RepositoryError {
    RepositoryError::Decode("simulated storage outage".to_string())
}

#[async_trait]
impl UserRepository for BrokenStore {
    async fn find_by_address(&self, _address: &str) -> Result<Option<User>, RepositoryError> {
        Err(outage())
    }
    async fn find_by_id(&self, _id: UserId) -> Result<Option<User>, RepositoryError> {
        Err(outage())
    }
    async fn create(
        &self,
        _address: &str,
        _created_at: DateTime<Utc>,
    ) -> Result<CreateUserOutcome, RepositoryError> {
        Err(outage())
    }
    async fn update_name(&self, _id: UserId, _name: &str) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn update_email(&self, _id: UserId, _email: &str) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn clear_onboarding_flag(&self, _id: UserId) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn mark_assistant(&self, _id: UserId, _flag: bool) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn list_support_contacts(&self) -> Result<Vec<SupportContact>, RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl MessageRepository for BrokenStore {
    async fn append(&self, _message: NewMessage) -> Result<MessageId, RepositoryError> {
        Err(outage())
    }
    async fn recent(
        &self,
        _user_id: UserId,
        _limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        Err(outage())
    }
    async fn count(&self, _user_id: UserId) -> Result<i64, RepositoryError> {
        Err(outage())
    }
    async fn recent_inbound(
        &self,
        _user_id: UserId,
        _limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl EscalationRepository for BrokenStore {
    async fn create(
        &self,
        _user_id: UserId,
        _message_id: Option<MessageId>,
        _reason: &str,
        _created_at: DateTime<Utc>,
    ) -> Result<EscalationCreated, RepositoryError> {
        Err(outage())
    }
    async fn find(&self, _id: EscalationId) -> Result<Option<Escalation>, RepositoryError> {
        Err(outage())
    }
    async fn original_message(&self, _id: EscalationId) -> Result<Option<String>, RepositoryError> {
        Err(outage())
    }
    async fn update_status(
        &self,
        _id: EscalationId,
        _status: EscalationStatus,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn list_for_user(&self, _user_id: UserId) -> Result<Vec<Escalation>, RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl ConversationStateRepository for BrokenStore {
    async fn get(&self, _user_id: UserId) -> Result<Option<ConversationState>, RepositoryError> {
        Err(outage())
    }
    async fn set_state(
        &self,
        _user_id: UserId,
        _tag: StateTag,
        _payload: Option<&str>,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn clear(&self, _user_id: UserId, _at: DateTime<Utc>) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn failure_count(&self, _user_id: UserId) -> Result<u32, RepositoryError> {
        Err(outage())
    }
    async fn set_failure_count(
        &self,
        _user_id: UserId,
        _count: u32,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl FaqRepository for BrokenStore {
    async fn find_match(
        &self,
        _query: &str,
        _min_query_chars: usize,
    ) -> Result<Option<FaqEntry>, RepositoryError> {
        Err(outage())
    }
    async fn add(
        &self,
        _question: &str,
        _answer: &str,
        _category: Option<&str>,
        _at: DateTime<Utc>,
    ) -> Result<FaqId, RepositoryError> {
        Err(outage())
    }
    async fn list(&self) -> Result<Vec<FaqEntry>, RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl AuditLogRepository for BrokenStore {
    async fn record(&self, _event: &AuditEvent) -> Result<(), RepositoryError> {
        Err(outage())
    }
    async fn list_by_type(&self, _log_type: &str) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        Err(outage())
    }
}

#[async_trait]
impl RetentionRepository for BrokenStore {
    async fn purge_older_than(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> Result<PurgeCounts, RepositoryError> {
        Err(outage())
    }
    async fn purge_resolved_escalations(&self) -> Result<u64, RepositoryError> {
        Err(outage())
    }
    async fn purge_stale_conversation_states(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        Err(outage())
    }
    async fn complete_conversation(
        &self,
        _user_id: UserId,
        _at: DateTime<Utc>,
    ) -> Result<CompletionCounts, RepositoryError> {
        Err(outage())
    }
}
