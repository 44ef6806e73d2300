use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use helpline_core::audit::AuditEvent;
use helpline_core::domain::conversation::{ConversationState, StateTag};
use helpline_core::domain::escalation::{
    Escalation, EscalationCreated, EscalationId, EscalationSchema, EscalationStatus,
};
use helpline_core::domain::faq::{FaqEntry, FaqId};
use helpline_core::domain::message::{ChatMessage, Direction, MessageId, NewMessage};
use helpline_core::domain::user::{SupportContact, User, UserId};

use super::{
    AuditLogEntry, AuditLogRepository, CompletionCounts, ConversationStateRepository,
    CreateUserOutcome, EscalationRepository, FaqRepository, MessageRepository, PurgeCounts,
    RepositoryError, RetentionRepository, UserRepository,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    messages: BTreeMap<i64, ChatMessage>,
    escalations: BTreeMap<i64, Escalation>,
    states: HashMap<UserId, ConversationState>,
    faqs: BTreeMap<i64, FaqEntry>,
    logs: Vec<AuditLogEntry>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_mut(&mut self, id: UserId) -> Result<&mut User, RepositoryError> {
        self.users.get_mut(&id.0).ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))
    }

    fn messages_for(&self, user_id: UserId, direction: Option<Direction>) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .messages
            .values()
            .filter(|message| message.user_id == user_id)
            .filter(|message| direction.map(|wanted| message.direction == wanted).unwrap_or(true))
            .cloned()
            .collect();
        messages.sort_by_key(|message| (message.created_at, message.id));
        messages
    }
}

fn last_n(mut messages: Vec<ChatMessage>, limit: u32) -> Vec<ChatMessage> {
    let keep = usize::try_from(limit).unwrap_or(usize::MAX);
    if messages.len() > keep {
        messages.drain(..messages.len() - keep);
    }
    messages
}

/// Process-local store backing every repository trait from one shared table set,
/// so cross-table operations see the same data the way the SQL store does.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_address(&self, address: &str) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|user| user.address == address).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id.0).cloned())
    }

    async fn create(
        &self,
        address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<CreateUserOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.users.values().find(|user| user.address == address) {
            return Ok(CreateUserOutcome::AlreadyExists(existing.clone()));
        }

        let id = tables.allocate_id();
        let user = User {
            id: UserId(id),
            address: address.to_string(),
            name: None,
            email: None,
            is_assistant: false,
            awaiting_onboarding: true,
            created_at,
        };
        tables.users.insert(id, user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn update_name(&self, id: UserId, name: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.user_mut(id)?;
        user.name = Some(name.to_string());
        user.awaiting_onboarding = false;
        Ok(())
    }

    async fn update_email(&self, id: UserId, email: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.user_mut(id)?.email = Some(email.to_string());
        Ok(())
    }

    async fn clear_onboarding_flag(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.user_mut(id)?.awaiting_onboarding = false;
        Ok(())
    }

    async fn mark_assistant(&self, id: UserId, is_assistant: bool) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.user_mut(id)?.is_assistant = is_assistant;
        Ok(())
    }

    async fn list_support_contacts(&self) -> Result<Vec<SupportContact>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut contacts: Vec<SupportContact> = tables
            .users
            .values()
            .filter(|user| user.is_assistant && user.has_name())
            .map(|user| SupportContact {
                name: user.display_name().to_string(),
                address: user.address.clone(),
            })
            .collect();
        contacts.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(contacts)
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryStore {
    async fn append(&self, message: NewMessage) -> Result<MessageId, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&message.user_id.0) {
            return Err(RepositoryError::NotFound(format!("user {}", message.user_id)));
        }
        let id = tables.allocate_id();
        tables.messages.insert(
            id,
            ChatMessage {
                id: MessageId(id),
                user_id: message.user_id,
                body: message.body,
                direction: message.direction,
                created_at: message.created_at,
            },
        );
        Ok(MessageId(id))
    }

    async fn recent(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(last_n(tables.messages_for(user_id, None), limit))
    }

    async fn count(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().await;
        let count = tables.messages.values().filter(|message| message.user_id == user_id).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn recent_inbound(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(last_n(tables.messages_for(user_id, Some(Direction::FromUser)), limit))
    }
}

fn delete_messages(tables: &mut Tables, user_id: UserId) -> u64 {
    let before = tables.messages.len();
    tables.messages.retain(|_, message| message.user_id != user_id);
    let deleted = before - tables.messages.len();
    detach_missing_messages(tables);
    deleted as u64
}

/// Mirrors `ON DELETE SET NULL` on the escalation's message reference.
fn detach_missing_messages(tables: &mut Tables) {
    let Tables { messages, escalations, .. } = tables;
    for escalation in escalations.values_mut() {
        if let Some(message_id) = escalation.message_id {
            if !messages.contains_key(&message_id.0) {
                escalation.message_id = None;
            }
        }
    }
}

#[async_trait::async_trait]
impl EscalationRepository for InMemoryStore {
    async fn create(
        &self,
        user_id: UserId,
        message_id: Option<MessageId>,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> Result<EscalationCreated, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id.0) {
            return Err(RepositoryError::NotFound(format!("user {user_id}")));
        }
        let id = tables.allocate_id();
        tables.escalations.insert(
            id,
            Escalation {
                id: EscalationId(id),
                user_id,
                message_id,
                status: EscalationStatus::Pending,
                reason: reason.to_string(),
                created_at,
                resolved_at: None,
            },
        );
        Ok(EscalationCreated { id: EscalationId(id), schema: EscalationSchema::Full })
    }

    async fn find(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.escalations.get(&id.0).cloned())
    }

    async fn original_message(&self, id: EscalationId) -> Result<Option<String>, RepositoryError> {
        let tables = self.tables.read().await;
        let escalation = tables
            .escalations
            .get(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("escalation {id}")))?;
        Ok(escalation
            .message_id
            .and_then(|message_id| tables.messages.get(&message_id.0))
            .map(|message| message.body.clone()))
    }

    async fn update_status(
        &self,
        id: EscalationId,
        status: EscalationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let escalation = tables
            .escalations
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("escalation {id}")))?;
        escalation.transition_to(status, at)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Escalation>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .escalations
            .values()
            .filter(|escalation| escalation.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ConversationStateRepository for InMemoryStore {
    async fn get(&self, user_id: UserId) -> Result<Option<ConversationState>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.states.get(&user_id).cloned())
    }

    async fn set_state(
        &self,
        user_id: UserId,
        tag: StateTag,
        payload: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let state = tables.states.entry(user_id).or_insert_with(|| ConversationState {
            user_id,
            tag: StateTag::None,
            payload: None,
            failure_count: 0,
            updated_at: at,
        });
        state.tag = tag;
        state.payload = payload.map(str::to_string);
        state.updated_at = at;
        Ok(())
    }

    async fn clear(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(state) = tables.states.get_mut(&user_id) {
            state.tag = StateTag::None;
            state.payload = None;
            state.updated_at = at;
        }
        Ok(())
    }

    async fn failure_count(&self, user_id: UserId) -> Result<u32, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.states.get(&user_id).map(|state| state.failure_count).unwrap_or(0))
    }

    async fn set_failure_count(
        &self,
        user_id: UserId,
        count: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let state = tables.states.entry(user_id).or_insert_with(|| ConversationState {
            user_id,
            tag: StateTag::None,
            payload: None,
            failure_count: 0,
            updated_at: at,
        });
        state.failure_count = count;
        state.updated_at = at;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FaqRepository for InMemoryStore {
    async fn find_match(
        &self,
        query: &str,
        min_query_chars: usize,
    ) -> Result<Option<FaqEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.faqs.values().find(|entry| entry.matches(query, min_query_chars)).cloned())
    }

    async fn add(
        &self,
        question: &str,
        answer: &str,
        category: Option<&str>,
        _at: DateTime<Utc>,
    ) -> Result<FaqId, RepositoryError> {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.faqs.insert(
            id,
            FaqEntry {
                id: FaqId(id),
                question: question.trim().to_string(),
                answer: answer.trim().to_string(),
                category: category.map(str::to_string),
            },
        );
        Ok(FaqId(id))
    }

    async fn list(&self) -> Result<Vec<FaqEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.faqs.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryStore {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.logs.push(AuditLogEntry {
            id,
            log_type: event.event_type.clone(),
            message: event.summary.clone(),
            metadata: event.metadata_json(),
            created_at: event.occurred_at,
        });
        Ok(())
    }

    async fn list_by_type(&self, log_type: &str) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.logs.iter().filter(|entry| entry.log_type == log_type).cloned().collect())
    }
}

#[async_trait::async_trait]
impl RetentionRepository for InMemoryStore {
    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<PurgeCounts, RepositoryError> {
        let mut tables = self.tables.write().await;

        let escalations_before = tables.escalations.len();
        tables.escalations.retain(|_, escalation| escalation.created_at >= cutoff);
        let escalations = escalations_before - tables.escalations.len();

        let messages_before = tables.messages.len();
        tables.messages.retain(|_, message| message.created_at >= cutoff);
        let messages = messages_before - tables.messages.len();
        detach_missing_messages(&mut tables);

        Ok(PurgeCounts { messages: messages as u64, escalations: escalations as u64 })
    }

    async fn purge_resolved_escalations(&self) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let before = tables.escalations.len();
        tables.escalations.retain(|_, escalation| escalation.status != EscalationStatus::Resolved);
        Ok((before - tables.escalations.len()) as u64)
    }

    async fn purge_stale_conversation_states(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let before = tables.states.len();
        tables.states.retain(|_, state| state.updated_at >= cutoff);
        Ok((before - tables.states.len()) as u64)
    }

    async fn complete_conversation(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<CompletionCounts, RepositoryError> {
        let mut tables = self.tables.write().await;
        let messages_deleted = delete_messages(&mut tables, user_id);

        let mut escalations_resolved = 0;
        for escalation in tables.escalations.values_mut() {
            if escalation.user_id == user_id && escalation.status == EscalationStatus::Pending {
                escalation.status = EscalationStatus::Resolved;
                escalation.resolved_at = Some(at);
                escalations_resolved += 1;
            }
        }
        tables.states.remove(&user_id);

        Ok(CompletionCounts { messages_deleted, escalations_resolved })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use helpline_core::domain::conversation::StateTag;
    use helpline_core::domain::escalation::EscalationStatus;
    use helpline_core::domain::message::NewMessage;

    use super::InMemoryStore;
    use crate::repositories::{
        ConversationStateRepository, EscalationRepository, FaqRepository, MessageRepository,
        RetentionRepository, UserRepository,
    };

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryStore::new();
        let user = UserRepository::create(&store, "263771234567", Utc::now())
            .await
            .expect("create")
            .into_user();
        let again = UserRepository::create(&store, "263771234567", Utc::now()).await;
        assert!(!again.expect("again").was_created());

        let first = store
            .append(NewMessage::inbound(user.id, "printer jammed", Utc::now()))
            .await
            .expect("append");
        store.append(NewMessage::reply(user.id, "open tray two", Utc::now())).await.expect("append");

        let escalation =
            EscalationRepository::create(&store, user.id, Some(first), "stuck", Utc::now())
                .await
                .expect("escalation");
        assert_eq!(
            store.original_message(escalation.id).await.expect("original").as_deref(),
            Some("printer jammed")
        );

        store
            .set_state(user.id, StateTag::AwaitingEmail, Some("1"), Utc::now())
            .await
            .expect("state");
        assert_eq!(store.recent_inbound(user.id, 3).await.expect("inbound").len(), 1);
        assert_eq!(store.count(user.id).await.expect("count"), 2);

        let counts = store.complete_conversation(user.id, Utc::now()).await.expect("complete");
        assert_eq!(counts.messages_deleted, 2);
        assert_eq!(counts.escalations_resolved, 1);
        assert!(store.get(user.id).await.expect("state").is_none());
        let escalation = EscalationRepository::find(&store, escalation.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(escalation.status, EscalationStatus::Resolved);
        assert!(escalation.message_id.is_none());
    }

    #[tokio::test]
    async fn in_memory_retention_matches_sql_semantics() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user =
            UserRepository::create(&store, "263771234567", now).await.expect("create").into_user();
        store
            .append(NewMessage::inbound(user.id, "old", now - Duration::days(8)))
            .await
            .expect("append");
        store
            .append(NewMessage::inbound(user.id, "new", now - Duration::days(6)))
            .await
            .expect("append");

        let counts = store.purge_older_than(now - Duration::days(7)).await.expect("purge");
        assert_eq!(counts.messages, 1);
        assert_eq!(store.recent(user.id, 10).await.expect("recent")[0].body, "new");
        assert!(store.find_match("anything at all", 4).await.expect("faq").is_none());
    }
}
