//! Conversation runtime for the helpline support agent.
//!
//! - `engine` runs one turn per inbound message: onboarding, end phrases, the
//!   awaiting-email detour, FAQ lookup and AI generation.
//! - `escalation` decides when a human should take over and performs the
//!   handoff (ticket record, notifications, email capture).
//! - `llm`, `notify` and `prompt` are the collaborator adapters.
//! - `retention` purges aged conversation data on a schedule.
//!
//! The model only drafts replies. Escalation, onboarding and data retention
//! are decided by deterministic rules.

pub mod engine;
pub mod escalation;
pub mod llm;
pub mod notify;
pub mod prompt;
pub mod retention;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::ConversationEngine;
pub use escalation::{EscalationEvaluator, EscalationHandler};
pub use llm::{HttpLlmClient, LlmClient, LlmError};
pub use notify::{HttpMailRelay, NoopNotifier, NotificationError, Notifier, TicketDetails};
pub use prompt::PromptBuilder;
pub use retention::{RetentionSweeper, SweepReport};
