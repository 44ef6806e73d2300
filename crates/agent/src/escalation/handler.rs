use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use helpline_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use helpline_core::domain::conversation::StateTag;
use helpline_core::domain::escalation::{EscalationId, EscalationSchema, EscalationStatus};
use helpline_core::domain::message::{MessageId, NewMessage};
use helpline_core::domain::user::{EmailAddress, SupportContact, User};
use helpline_core::policy::EscalationReason;
use helpline_db::Repositories;

use crate::notify::{NotificationError, Notifier, TicketDetails};

pub const ESCALATION_FALLBACK: &str =
    "I'm connecting you with our support team. Someone will follow up with you shortly.";
pub const EMAIL_RETRY_PROMPT: &str = "That doesn't look like a valid email address. \
Please send it in the format name@example.com so I can create your support ticket.";

/// Hands a conversation to human support. Every step is best-effort; a
/// failing step is logged and the remaining steps still run.
pub struct EscalationHandler {
    repos: Repositories,
    notifier: Arc<dyn Notifier>,
    support_address: Option<String>,
}

#[derive(Default)]
struct NotificationOutcome {
    ticket_sent: bool,
    confirmation_sent: bool,
}

impl NotificationOutcome {
    fn all_sent(&self) -> bool {
        self.ticket_sent && self.confirmation_sent
    }
}

impl EscalationHandler {
    pub fn new(
        repos: Repositories,
        notifier: Arc<dyn Notifier>,
        support_address: Option<String>,
    ) -> Self {
        Self { repos, notifier, support_address }
    }

    /// `inbound_id` is the already-saved inbound message of this turn, if any.
    pub async fn handle(
        &self,
        user: &User,
        message: &str,
        inbound_id: Option<MessageId>,
        reason: &EscalationReason,
        correlation_id: &str,
    ) -> String {
        let inbound_id = match inbound_id {
            Some(id) => Some(id),
            None => {
                let inbound = NewMessage::inbound(user.id, message, Utc::now());
                match self.repos.messages.append(inbound).await {
                    Ok(id) => Some(id),
                    Err(error) => {
                        step_failed("save_inbound", correlation_id, &error);
                        None
                    }
                }
            }
        };

        let escalation_id = match self
            .repos
            .escalations
            .create(user.id, inbound_id, &reason.to_string(), Utc::now())
            .await
        {
            Ok(created) => {
                if created.schema == EscalationSchema::LegacyWithoutResolvedAt {
                    warn!(
                        event_name = "escalation.create.degraded",
                        correlation_id,
                        escalation_id = created.id.0,
                        "escalation stored without resolved_at column"
                    );
                }
                Some(created.id)
            }
            Err(error) => {
                step_failed("create_escalation", correlation_id, &error);
                None
            }
        };

        info!(
            event_name = "escalation.created",
            correlation_id,
            user_id = user.id.0,
            escalation_id = escalation_id.map(|id| id.0),
            reason = reason.code(),
            "conversation escalated to human support"
        );
        self.record_audit(user, escalation_id, reason, correlation_id).await;

        if let Err(error) = self.repos.states.set_failure_count(user.id, 0, Utc::now()).await {
            step_failed("reset_failures", correlation_id, &error);
        }

        let reply = match escalation_id {
            None => ESCALATION_FALLBACK.to_string(),
            Some(id) => match user.contact_email() {
                Some(email) => {
                    let ticket = self.ticket(user, id, email, message, &reason.to_string());
                    let outcome = self.notify(email, &ticket, correlation_id).await;
                    if outcome.all_sent() {
                        format!(
                            "I've created support ticket #{id} for you. A confirmation email has been \
sent to {email}. Our support team will contact you shortly."
                        )
                    } else {
                        format!(
                            "I've created support ticket #{id} for you. Our support team will follow \
up with you shortly."
                        )
                    }
                }
                None => self.request_email(user, id, correlation_id).await,
            },
        };

        self.save_reply(user, &reply, correlation_id).await;
        reply
    }

    /// Finishes an escalation that was waiting for the user's email address.
    /// Invalid input leaves all state untouched.
    pub async fn complete_with_email(
        &self,
        user: &User,
        message: &str,
        escalation_id: EscalationId,
        correlation_id: &str,
    ) -> String {
        if let Err(error) =
            self.repos.messages.append(NewMessage::inbound(user.id, message, Utc::now())).await
        {
            step_failed("save_inbound", correlation_id, &error);
        }

        let email = match EmailAddress::parse(message) {
            Ok(email) => email,
            Err(_) => {
                info!(
                    event_name = "escalation.email.rejected",
                    correlation_id,
                    user_id = user.id.0,
                    "awaiting email but message is not an email address"
                );
                return EMAIL_RETRY_PROMPT.to_string();
            }
        };

        if let Err(error) = self.repos.users.update_email(user.id, email.as_str()).await {
            step_failed("update_email", correlation_id, &error);
        }

        let original_message = match self.repos.escalations.original_message(escalation_id).await {
            Ok(Some(body)) => body,
            Ok(None) => "(original message unavailable)".to_string(),
            Err(error) => {
                step_failed("original_message", correlation_id, &error);
                "(original message unavailable)".to_string()
            }
        };
        let reason = match self.repos.escalations.find(escalation_id).await {
            Ok(Some(escalation)) => escalation.reason,
            Ok(None) => String::new(),
            Err(error) => {
                step_failed("find_escalation", correlation_id, &error);
                String::new()
            }
        };

        let ticket = self.ticket(user, escalation_id, email.as_str(), &original_message, &reason);
        let outcome = self.notify(email.as_str(), &ticket, correlation_id).await;

        if let Err(error) = self
            .repos
            .escalations
            .update_status(escalation_id, EscalationStatus::EmailProvided, Utc::now())
            .await
        {
            step_failed("update_status", correlation_id, &error);
        }
        if let Err(error) = self.repos.states.clear(user.id, Utc::now()).await {
            step_failed("clear_state", correlation_id, &error);
        }
        if let Err(error) = self.repos.states.set_failure_count(user.id, 0, Utc::now()).await {
            step_failed("reset_failures", correlation_id, &error);
        }

        info!(
            event_name = "escalation.email_provided",
            correlation_id,
            user_id = user.id.0,
            escalation_id = escalation_id.0,
            ticket_sent = outcome.ticket_sent,
            confirmation_sent = outcome.confirmation_sent,
            "contact email captured for escalation"
        );

        let reply = if outcome.all_sent() {
            format!(
                "Thank you! Your support ticket #{escalation_id} has been created and a confirmation \
has been sent to {}. Our team will contact you shortly.",
                email.as_str()
            )
        } else {
            format!(
                "Thank you! Your support ticket #{escalation_id} has been recorded and our team will \
follow up with you shortly."
            )
        };
        self.save_reply(user, &reply, correlation_id).await;
        reply
    }

    async fn request_email(&self, user: &User, id: EscalationId, correlation_id: &str) -> String {
        let contacts = match self.repos.users.list_support_contacts().await {
            Ok(contacts) => contacts,
            Err(error) => {
                step_failed("list_support_contacts", correlation_id, &error);
                Vec::new()
            }
        };

        if let Err(error) = self
            .repos
            .states
            .set_state(user.id, StateTag::AwaitingEmail, Some(&id.to_string()), Utc::now())
            .await
        {
            step_failed("await_email", correlation_id, &error);
        }

        let mut reply = format!(
            "I'll connect you with our support team (ticket #{id}). Please reply with your email \
address so we can send you the ticket details."
        );
        append_contacts(&mut reply, &contacts);
        reply
    }

    async fn notify(
        &self,
        user_email: &str,
        ticket: &TicketDetails,
        correlation_id: &str,
    ) -> NotificationOutcome {
        let mut outcome = NotificationOutcome::default();

        let ticket_result = match &self.support_address {
            Some(staff) => self.notifier.send_ticket(staff, ticket).await,
            None => Err(NotificationError::Disabled),
        };
        match ticket_result {
            Ok(()) => outcome.ticket_sent = true,
            Err(error) => step_failed("send_ticket", correlation_id, &error),
        }

        match self.notifier.send_confirmation(user_email, ticket).await {
            Ok(()) => outcome.confirmation_sent = true,
            Err(error) => step_failed("send_confirmation", correlation_id, &error),
        }

        outcome
    }

    fn ticket(
        &self,
        user: &User,
        id: EscalationId,
        email: &str,
        original_message: &str,
        reason: &str,
    ) -> TicketDetails {
        TicketDetails {
            escalation_id: id,
            user_name: user.display_name().to_string(),
            user_address: user.address.clone(),
            user_email: email.to_string(),
            original_message: original_message.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn record_audit(
        &self,
        user: &User,
        escalation_id: Option<EscalationId>,
        reason: &EscalationReason,
        correlation_id: &str,
    ) {
        let outcome = if escalation_id.is_some() { AuditOutcome::Success } else { AuditOutcome::Failed };
        let summary = match escalation_id {
            Some(id) => format!("Escalation #{id} created: {reason}"),
            None => format!("Escalation could not be stored: {reason}"),
        };
        let mut event = AuditEvent::new(
            Some(user.id),
            correlation_id,
            "escalation.created",
            AuditCategory::Escalation,
            outcome,
            summary,
        )
        .with_metadata("reason_code", reason.code());
        if let Some(id) = escalation_id {
            event = event.with_metadata("escalation_id", id.to_string());
        }

        if let Err(error) = self.repos.audit.record(&event).await {
            step_failed("audit", correlation_id, &error);
        }
    }

    async fn save_reply(&self, user: &User, reply: &str, correlation_id: &str) {
        if let Err(error) = self.repos.messages.append(NewMessage::reply(user.id, reply, Utc::now())).await
        {
            step_failed("save_reply", correlation_id, &error);
        }
    }
}

fn append_contacts(reply: &mut String, contacts: &[SupportContact]) {
    if contacts.is_empty() {
        return;
    }
    reply.push_str("\n\nYou can also reach our support staff directly:");
    for contact in contacts {
        reply.push_str(&format!("\n- {}: {}", contact.name, contact.address));
    }
}

fn step_failed(step: &str, correlation_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event_name = "escalation.step_failed",
        correlation_id,
        step,
        error = %error,
        "escalation step failed; continuing"
    );
}
