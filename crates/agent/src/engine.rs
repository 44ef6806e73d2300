use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use helpline_core::address::AddressNormalizer;
use helpline_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use helpline_core::config::ConversationConfig;
use helpline_core::domain::escalation::{EscalationId, EscalationStatus};
use helpline_core::domain::message::{MessageId, NewMessage};
use helpline_core::domain::user::User;
use helpline_core::errors::{ApplicationError, GENERIC_APOLOGY};
use helpline_core::policy::{EscalationDecision, EscalationReason, EscalationRules};
use helpline_core::quality::QualityHeuristic;
use helpline_db::Repositories;

use crate::escalation::{EscalationEvaluator, EscalationHandler};
use crate::llm::LlmClient;
use crate::notify::Notifier;
use crate::prompt::PromptBuilder;

pub const WELCOME_PROMPT: &str = "Welcome! Please tell me your name to get started.";
pub const CLOSING_MESSAGE: &str = "Thank you for chatting with us, Your conversation has been \
completed and data cleared for privacy. Have a great day!";
pub const NAME_REPROMPT: &str = "I didn't catch your name. Please reply with the name you'd \
like me to use.";
pub const REPHRASE_FALLBACK: &str = "I'm sorry, I couldn't come up with an answer to that. \
Could you rephrase your question or add a little more detail?";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnPath {
    Rejected,
    Welcome,
    Onboarding,
    Completed,
    AwaitingEmail,
    Faq,
    Ai,
    Escalated,
    Failed,
}

impl TurnPath {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Welcome => "welcome",
            Self::Onboarding => "onboarding",
            Self::Completed => "completed",
            Self::AwaitingEmail => "awaiting_email",
            Self::Faq => "faq",
            Self::Ai => "ai",
            Self::Escalated => "escalated",
            Self::Failed => "failed",
        }
    }
}

enum ResolvedUser {
    New,
    Existing(User),
}

/// What a failed normal turn had already persisted.
#[derive(Default)]
struct TurnProgress {
    inbound_id: Option<MessageId>,
}

/// Per-user conversation state machine: onboarding, FAQ, AI, escalation and
/// the awaiting-email detour.
pub struct ConversationEngine {
    repos: Repositories,
    llm: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    evaluator: EscalationEvaluator,
    handler: EscalationHandler,
    normalizer: AddressNormalizer,
    context_window: u32,
    faq_min_query_chars: usize,
}

impl ConversationEngine {
    pub fn new(
        repos: Repositories,
        llm: Arc<dyn LlmClient>,
        notifier: Arc<dyn Notifier>,
        config: &ConversationConfig,
        support_address: Option<String>,
    ) -> Self {
        let evaluator = EscalationEvaluator::new(
            repos.clone(),
            EscalationRules::from_config(config),
            QualityHeuristic::from_config(config),
        );
        let handler = EscalationHandler::new(repos.clone(), notifier, support_address);
        Self {
            repos,
            llm,
            prompts: PromptBuilder::new(),
            evaluator,
            handler,
            normalizer: AddressNormalizer::from_config(config),
            context_window: config.context_window,
            faq_min_query_chars: config.faq_min_query_chars,
        }
    }

    /// Runs one turn and always produces a reply.
    pub async fn handle(&self, sender: &str, text: &str, correlation_id: &str) -> String {
        let started = Instant::now();
        debug!(
            event_name = "conversation.turn.received",
            correlation_id,
            sender,
            text,
            "inbound message"
        );

        let (path, reply) = self.dispatch(sender, text, correlation_id).await;

        info!(
            event_name = "conversation.turn.completed",
            correlation_id,
            path = path.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );
        reply
    }

    async fn dispatch(&self, sender: &str, text: &str, correlation_id: &str) -> (TurnPath, String) {
        let address = match self.normalizer.normalize(sender) {
            Ok(address) => address,
            Err(error) => {
                warn!(
                    event_name = "conversation.turn.invalid_address",
                    correlation_id,
                    error = %error,
                    "sender address could not be normalized"
                );
                let interface = ApplicationError::from(error).into_interface(correlation_id);
                return (TurnPath::Rejected, interface.user_message().to_string());
            }
        };

        let mut user = match self.resolve_user(&address, correlation_id).await {
            Ok(ResolvedUser::New) => return (TurnPath::Welcome, WELCOME_PROMPT.to_string()),
            Ok(ResolvedUser::Existing(user)) => user,
            Err(error) => {
                error!(
                    event_name = "conversation.turn.user_unavailable",
                    correlation_id,
                    address = %address,
                    error = %error,
                    "could not resolve user; replying with apology"
                );
                return (TurnPath::Failed, GENERIC_APOLOGY.to_string());
            }
        };

        if user.repair_onboarding_flag() {
            if let Err(error) = self.repos.users.clear_onboarding_flag(user.id).await {
                warn!(
                    event_name = "conversation.repair.onboarding_flag_failed",
                    correlation_id,
                    user_id = user.id.0,
                    error = %error,
                    "stale onboarding flag could not be cleared"
                );
            }
        }

        if user.needs_onboarding() {
            return self.onboard(&user, text, correlation_id).await;
        }

        if self.evaluator.rules().is_end_phrase(text) {
            return self.complete(&user, correlation_id).await;
        }

        if let Some(escalation_id) = self.awaiting_email_for(&user, correlation_id).await {
            let reply =
                self.handler.complete_with_email(&user, text, escalation_id, correlation_id).await;
            return (TurnPath::AwaitingEmail, reply);
        }

        let mut progress = TurnProgress::default();
        match self.normal_turn(&user, text, correlation_id, &mut progress).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(
                    event_name = "conversation.turn.failed",
                    correlation_id,
                    user_id = user.id.0,
                    class = ?error.class(),
                    error = %error,
                    "turn failed; escalating"
                );
                let reply = self
                    .handler
                    .handle(
                        &user,
                        text,
                        progress.inbound_id,
                        &EscalationReason::InternalError,
                        correlation_id,
                    )
                    .await;
                (TurnPath::Escalated, reply)
            }
        }
    }

    async fn resolve_user(
        &self,
        address: &str,
        correlation_id: &str,
    ) -> Result<ResolvedUser, ApplicationError> {
        if let Some(user) = self.repos.users.find_by_address(address).await? {
            return Ok(ResolvedUser::Existing(user));
        }

        let outcome = self.repos.users.create(address, Utc::now()).await?;
        if outcome.was_created() {
            let user = outcome.into_user();
            info!(
                event_name = "conversation.user.created",
                correlation_id,
                user_id = user.id.0,
                "new user awaiting onboarding"
            );
            return Ok(ResolvedUser::New);
        }
        Ok(ResolvedUser::Existing(outcome.into_user()))
    }

    async fn onboard(&self, user: &User, text: &str, correlation_id: &str) -> (TurnPath, String) {
        let name = text.trim();
        if name.is_empty() {
            return (TurnPath::Onboarding, NAME_REPROMPT.to_string());
        }
        match self.repos.users.update_name(user.id, name).await {
            Ok(()) => {
                info!(
                    event_name = "conversation.user.onboarded",
                    correlation_id,
                    user_id = user.id.0,
                    "stored user name"
                );
                (TurnPath::Onboarding, format!("Thank you, {name}! How can I assist you today?"))
            }
            Err(error) => {
                error!(
                    event_name = "conversation.user.onboarding_failed",
                    correlation_id,
                    user_id = user.id.0,
                    error = %error,
                    "could not store user name"
                );
                (TurnPath::Failed, GENERIC_APOLOGY.to_string())
            }
        }
    }

    async fn complete(&self, user: &User, correlation_id: &str) -> (TurnPath, String) {
        let counts = match self.repos.retention.complete_conversation(user.id, Utc::now()).await {
            Ok(counts) => counts,
            Err(error) => {
                error!(
                    event_name = "conversation.completion.failed",
                    correlation_id,
                    user_id = user.id.0,
                    error = %error,
                    "conversation completion failed"
                );
                return (TurnPath::Failed, GENERIC_APOLOGY.to_string());
            }
        };

        info!(
            event_name = "conversation.completed",
            correlation_id,
            user_id = user.id.0,
            messages_deleted = counts.messages_deleted,
            escalations_resolved = counts.escalations_resolved,
            "conversation completed and cleared"
        );
        let event = AuditEvent::new(
            Some(user.id),
            correlation_id,
            "conversation.completed",
            AuditCategory::Conversation,
            AuditOutcome::Success,
            format!("Conversation completed for user {}", user.id),
        )
        .with_metadata("messages_deleted", counts.messages_deleted.to_string())
        .with_metadata("escalations_resolved", counts.escalations_resolved.to_string());
        if let Err(error) = self.repos.audit.record(&event).await {
            warn!(
                event_name = "conversation.completion.audit_failed",
                correlation_id,
                error = %error,
                "completion audit record not written"
            );
        }

        (TurnPath::Completed, CLOSING_MESSAGE.to_string())
    }

    /// The escalation an `AwaitingEmail` state still points at. Broken or
    /// stale states are cleared so the turn proceeds normally.
    async fn awaiting_email_for(&self, user: &User, correlation_id: &str) -> Option<EscalationId> {
        let state = match self.repos.states.get(user.id).await {
            Ok(Some(state)) if state.is_awaiting_email() => state,
            Ok(_) => return None,
            Err(error) => {
                warn!(
                    event_name = "conversation.state.read_failed",
                    correlation_id,
                    user_id = user.id.0,
                    error = %error,
                    "conversation state unavailable; treating as normal turn"
                );
                return None;
            }
        };

        let usable = match state.pending_escalation() {
            None => None,
            Some(id) => match self.repos.escalations.find(id).await {
                Ok(Some(escalation)) if escalation.status == EscalationStatus::Pending => Some(id),
                Ok(_) => None,
                Err(error) => {
                    warn!(
                        event_name = "conversation.state.escalation_lookup_failed",
                        correlation_id,
                        escalation_id = id.0,
                        error = %error,
                        "could not verify pending escalation; keeping state"
                    );
                    Some(id)
                }
            },
        };

        if usable.is_none() {
            warn!(
                event_name = "conversation.repair.awaiting_email_cleared",
                correlation_id,
                user_id = user.id.0,
                payload = state.payload.as_deref().unwrap_or(""),
                "awaiting-email state without a pending escalation; clearing"
            );
            if let Err(error) = self.repos.states.clear(user.id, Utc::now()).await {
                warn!(
                    event_name = "conversation.repair.clear_failed",
                    correlation_id,
                    error = %error,
                    "stale state could not be cleared"
                );
            }
        }
        usable
    }

    async fn normal_turn(
        &self,
        user: &User,
        text: &str,
        correlation_id: &str,
        progress: &mut TurnProgress,
    ) -> Result<(TurnPath, String), ApplicationError> {
        if let EscalationDecision::Escalate(reason) = self.evaluator.explicit_request(text) {
            let reply = self.handler.handle(user, text, None, &reason, correlation_id).await;
            return Ok((TurnPath::Escalated, reply));
        }

        match self.repos.faqs.find_match(text, self.faq_min_query_chars).await {
            Ok(Some(entry)) => {
                let answer = NewMessage::reply(user.id, &entry.answer, Utc::now());
                if let Err(error) = self.repos.messages.append(answer).await {
                    warn!(
                        event_name = "conversation.faq.save_failed",
                        correlation_id,
                        faq_id = entry.id.0,
                        error = %error,
                        "faq answer not saved to history"
                    );
                }
                return Ok((TurnPath::Faq, entry.answer));
            }
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "conversation.faq.lookup_failed",
                correlation_id,
                error = %error,
                "faq lookup failed; continuing without it"
            ),
        }

        let history = match self.repos.messages.recent(user.id, self.context_window).await {
            Ok(history) => history,
            Err(error) => {
                warn!(
                    event_name = "conversation.history.read_failed",
                    correlation_id,
                    error = %error,
                    "history unavailable; prompting without context"
                );
                Vec::new()
            }
        };

        let inbound_id =
            self.repos.messages.append(NewMessage::inbound(user.id, text, Utc::now())).await?;
        progress.inbound_id = Some(inbound_id);

        let prompt = self.prompts.build(&history, text);
        let response = match self.llm.complete(&prompt).await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    event_name = "conversation.llm.failed",
                    correlation_id,
                    error = %error,
                    "ai generation failed; treating as empty response"
                );
                String::new()
            }
        };

        if let EscalationDecision::Escalate(reason) =
            self.evaluator.evaluate(user, text, Some(&response), correlation_id).await
        {
            let reply =
                self.handler.handle(user, text, Some(inbound_id), &reason, correlation_id).await;
            return Ok((TurnPath::Escalated, reply));
        }

        let low_quality = self.evaluator.is_low_quality(&response);
        let reply =
            if response.trim().is_empty() { REPHRASE_FALLBACK.to_string() } else { response };
        self.repos.messages.append(NewMessage::reply(user.id, &reply, Utc::now())).await?;

        if !low_quality {
            if let Err(error) = self.repos.states.set_failure_count(user.id, 0, Utc::now()).await {
                warn!(
                    event_name = "conversation.failures.reset_failed",
                    correlation_id,
                    error = %error,
                    "failure counter not reset"
                );
            }
        }

        Ok((TurnPath::Ai, reply))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use helpline_core::config::ConversationConfig;
    use helpline_core::domain::conversation::StateTag;
    use helpline_core::domain::escalation::EscalationStatus;
    use helpline_core::domain::message::{Direction, NewMessage};
    use helpline_core::errors::GENERIC_APOLOGY;
    use helpline_db::repositories::{
        AuditLogRepository, ConversationStateRepository, EscalationRepository, FaqRepository,
        MessageRepository, UserRepository,
    };
    use helpline_db::{InMemoryStore, Repositories};

    use super::{
        ConversationEngine, CLOSING_MESSAGE, NAME_REPROMPT, REPHRASE_FALLBACK, WELCOME_PROMPT,
    };
    use crate::escalation::EMAIL_RETRY_PROMPT;
    use crate::testing::{FailingEverything, RecordingNotifier, ScriptedLlm};

    const SENDER: &str = "263771234567@c.us";
    const ADDRESS: &str = "263771234567";
    const GOOD_ANSWER: &str = "Hello! Please restart the router and try again.";

    struct Harness {
        store: InMemoryStore,
        llm: Arc<ScriptedLlm>,
        notifier: Arc<RecordingNotifier>,
        engine: ConversationEngine,
    }

    fn harness(llm: ScriptedLlm) -> Harness {
        let store = InMemoryStore::new();
        let llm = Arc::new(llm);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ConversationEngine::new(
            Repositories::in_memory(store.clone()),
            llm.clone(),
            notifier.clone(),
            &ConversationConfig::default(),
            Some("support@example.com".to_string()),
        );
        Harness { store, llm, notifier, engine }
    }

    async fn onboarded(harness: &Harness) {
        assert_eq!(harness.engine.handle(SENDER, "hi", "c-0").await, WELCOME_PROMPT);
        harness.engine.handle(SENDER, "Tatenda", "c-0").await;
    }

    async fn user_id(harness: &Harness) -> helpline_core::domain::user::UserId {
        harness.store.find_by_address(ADDRESS).await.expect("find").expect("user exists").id
    }

    #[tokio::test]
    async fn first_contact_creates_one_user_awaiting_onboarding() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));

        let reply = harness.engine.handle(SENDER, "hello?", "c-1").await;

        assert_eq!(reply, WELCOME_PROMPT);
        let user = harness.store.find_by_address(ADDRESS).await.expect("find").expect("created");
        assert!(user.awaiting_onboarding);
        assert!(user.name.is_none());
        assert!(harness.llm.prompts().await.is_empty());

        let same = harness.engine.handle("771234567", "Tatenda", "c-2").await;
        assert_eq!(same, "Thank you, Tatenda! How can I assist you today?");
    }

    #[tokio::test]
    async fn second_message_is_stored_verbatim_as_the_name() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        harness.engine.handle(SENDER, "hi", "c-1").await;

        let reply = harness.engine.handle(SENDER, "Tatenda Moyo", "c-2").await;

        assert_eq!(reply, "Thank you, Tatenda Moyo! How can I assist you today?");
        let user = harness.store.find_by_address(ADDRESS).await.expect("find").expect("exists");
        assert_eq!(user.name.as_deref(), Some("Tatenda Moyo"));
        assert!(!user.awaiting_onboarding);
    }

    #[tokio::test]
    async fn blank_name_keeps_the_user_in_onboarding() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        harness.engine.handle(SENDER, "hi", "c-1").await;

        let reply = harness.engine.handle(SENDER, "   \t ", "c-2").await;

        assert_eq!(reply, NAME_REPROMPT);
        let user = harness.store.find_by_address(ADDRESS).await.expect("find").expect("exists");
        assert!(user.name.is_none());
        assert!(user.awaiting_onboarding);

        let named = harness.engine.handle(SENDER, "Rudo", "c-3").await;
        assert_eq!(named, "Thank you, Rudo! How can I assist you today?");
    }

    #[tokio::test]
    async fn ai_turn_persists_both_sides_and_uses_history() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;

        let first = harness.engine.handle(SENDER, "my wifi keeps dropping", "c-3").await;
        assert_eq!(first, GOOD_ANSWER);
        harness.engine.handle(SENDER, "it happens every evening", "c-4").await;

        let id = user_id(&harness).await;
        let history = harness.store.recent(id, 10).await.expect("history");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].direction, Direction::FromUser);
        assert_eq!(history[1].direction, Direction::FromBot);

        let prompts = harness.llm.prompts().await;
        assert!(!prompts[0].contains("Previous conversation"));
        assert!(prompts[1].contains("User: my wifi keeps dropping"));
        assert!(prompts[1].contains("User's current message: it happens every evening"));
    }

    #[tokio::test]
    async fn faq_answer_skips_the_ai() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;
        harness
            .store
            .add("How do I reset my password", "Use the self-service portal.", None, Utc::now())
            .await
            .expect("faq");

        let reply = harness.engine.handle(SENDER, "how do i reset my password", "c-5").await;

        assert_eq!(reply, "Use the self-service portal.");
        assert!(harness.llm.prompts().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_request_escalates_without_consulting_the_ai() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;

        let reply = harness.engine.handle(SENDER, "I need to speak to someone", "c-6").await;

        assert!(reply.contains("email address"));
        assert!(harness.llm.prompts().await.is_empty());
        let state = harness.store.get(user_id(&harness).await).await.expect("state").expect("row");
        assert_eq!(state.tag, StateTag::AwaitingEmail);
    }

    #[tokio::test]
    async fn third_failed_ai_response_escalates() {
        let harness = harness(ScriptedLlm::failing());
        onboarded(&harness).await;

        let first = harness.engine.handle(SENDER, "printer jammed on floor two", "c-7").await;
        assert_eq!(first, REPHRASE_FALLBACK);
        let second = harness.engine.handle(SENDER, "the scanner is also offline", "c-8").await;
        assert_eq!(second, REPHRASE_FALLBACK);
        let third = harness.engine.handle(SENDER, "and email will not sync at all", "c-9").await;

        assert_ne!(third, REPHRASE_FALLBACK);
        assert!(third.contains("ticket #"));
        let id = user_id(&harness).await;
        assert_eq!(harness.store.list_for_user(id).await.expect("list").len(), 1);
        assert_eq!(harness.store.failure_count(id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn repeating_the_same_message_twice_escalates_as_stuck() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;

        let first = harness.engine.handle(SENDER, "printer broken", "c-30").await;
        assert_eq!(first, GOOD_ANSWER);

        let second = harness.engine.handle(SENDER, "Printer broken ", "c-31").await;

        assert_ne!(second, GOOD_ANSWER);
        assert!(second.contains("ticket #"));
        let id = user_id(&harness).await;
        let escalations = harness.store.list_for_user(id).await.expect("list");
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].reason, "User appears stuck (repetition)");
    }

    #[tokio::test]
    async fn good_response_resets_the_failure_counter() {
        let harness = harness(ScriptedLlm::scripted(
            vec![Err(crate::llm::LlmError::Timeout(30))],
            GOOD_ANSWER,
        ));
        onboarded(&harness).await;

        harness.engine.handle(SENDER, "printer jammed on floor two", "c-10").await;
        let id = user_id(&harness).await;
        assert_eq!(harness.store.failure_count(id).await.expect("count"), 1);

        harness.engine.handle(SENDER, "the scanner is also offline", "c-11").await;
        assert_eq!(harness.store.failure_count(id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn end_phrase_clears_the_conversation() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;
        harness.engine.handle(SENDER, "my wifi keeps dropping", "c-12").await;
        let id = user_id(&harness).await;
        let escalation = EscalationRepository::create(&harness.store, id, None, "manual", Utc::now())
            .await
            .expect("escalation");

        let reply = harness.engine.handle(SENDER, "  BYE ", "c-13").await;

        assert_eq!(reply, CLOSING_MESSAGE);
        assert_eq!(harness.store.count(id).await.expect("count"), 0);
        assert!(harness.store.get(id).await.expect("state").is_none());
        let stored = harness.store.find(escalation.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, EscalationStatus::Resolved);
        assert_eq!(
            harness.store.list_by_type("conversation.completed").await.expect("audit").len(),
            1
        );
        assert!(harness.store.find_by_address(ADDRESS).await.expect("find").is_some());

        harness.engine.handle(SENDER, "new question about vpn access", "c-14").await;
        let prompts = harness.llm.prompts().await;
        assert!(!prompts.last().expect("prompt").contains("Previous conversation"));
    }

    #[tokio::test]
    async fn awaiting_email_flow_completes_on_a_valid_address() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;
        harness.engine.handle(SENDER, "let me talk to a human", "c-15").await;
        let id = user_id(&harness).await;
        let escalation_id = harness
            .store
            .get(id)
            .await
            .expect("state")
            .and_then(|state| state.pending_escalation())
            .expect("awaiting email");

        let retry = harness.engine.handle(SENDER, "not-an-email", "c-16").await;
        assert_eq!(retry, EMAIL_RETRY_PROMPT);
        assert!(harness.store.get(id).await.expect("state").expect("row").is_awaiting_email());

        let done = harness.engine.handle(SENDER, "user@example.com", "c-17").await;
        assert!(done.contains(&format!("#{escalation_id}")));
        assert_eq!(harness.store.get(id).await.expect("state").expect("row").tag, StateTag::None);
        let escalation = harness.store.find(escalation_id).await.expect("find").expect("exists");
        assert_eq!(escalation.status, EscalationStatus::EmailProvided);
        let kinds: Vec<String> =
            harness.notifier.sent().await.into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec!["ticket".to_string(), "confirmation".to_string()]);
    }

    #[tokio::test]
    async fn stale_awaiting_email_state_is_repaired() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        onboarded(&harness).await;
        let id = user_id(&harness).await;
        harness
            .store
            .set_state(id, StateTag::AwaitingEmail, Some("not-a-number"), Utc::now())
            .await
            .expect("state");

        let reply = harness.engine.handle(SENDER, "how do I map a network drive", "c-18").await;

        assert_eq!(reply, GOOD_ANSWER);
        assert_eq!(harness.store.get(id).await.expect("state").expect("row").tag, StateTag::None);
    }

    #[tokio::test]
    async fn returning_named_user_goes_straight_to_a_normal_turn() {
        let harness = harness(ScriptedLlm::always(GOOD_ANSWER));
        let user = UserRepository::create(&harness.store, ADDRESS, Utc::now())
            .await
            .expect("create")
            .into_user();
        harness.store.update_name(user.id, "Farai").await.expect("name");
        harness
            .store
            .append(NewMessage::inbound(user.id, "earlier", Utc::now()))
            .await
            .expect("append");

        let reply = harness.engine.handle(SENDER, "my laptop will not boot", "c-19").await;

        assert_eq!(reply, GOOD_ANSWER);
        let stored = harness.store.find_by_id(user.id).await.expect("find").expect("exists");
        assert_eq!(stored.name.as_deref(), Some("Farai"));
    }

    #[tokio::test]
    async fn unexpected_storage_failure_routes_to_escalation() {
        let store = InMemoryStore::new();
        let seeded = Repositories::in_memory(store.clone());
        let user = seeded.users.create(ADDRESS, Utc::now()).await.expect("create").into_user();
        seeded.users.update_name(user.id, "Tatenda").await.expect("name");

        let engine = ConversationEngine::new(
            FailingEverything::wrap(seeded),
            Arc::new(ScriptedLlm::always(GOOD_ANSWER)),
            Arc::new(RecordingNotifier::default()),
            &ConversationConfig::default(),
            None,
        );

        let reply = engine.handle(SENDER, "my laptop will not boot", "c-20").await;
        assert_eq!(reply, crate::escalation::ESCALATION_FALLBACK);
    }

    #[tokio::test]
    async fn unresolvable_user_gets_the_generic_apology() {
        let store = InMemoryStore::new();
        let repos = Repositories {
            users: Arc::new(crate::testing::BrokenStore),
            ..Repositories::in_memory(store)
        };
        let engine = ConversationEngine::new(
            repos,
            Arc::new(ScriptedLlm::always(GOOD_ANSWER)),
            Arc::new(RecordingNotifier::default()),
            &ConversationConfig::default(),
            None,
        );

        assert_eq!(engine.handle(SENDER, "hello", "c-21").await, GENERIC_APOLOGY);
    }
}
