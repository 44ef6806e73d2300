use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{info, warn};

use helpline_core::config::NotificationConfig;
use helpline_core::domain::escalation::EscalationId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notifications are disabled")]
    Disabled,
    #[error("notification template failed: {0}")]
    Template(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("mail relay returned status {0}")]
    Status(u16),
}

/// Fields shared by the staff ticket and the user confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketDetails {
    pub escalation_id: EscalationId,
    pub user_name: String,
    pub user_address: String,
    pub user_email: String,
    pub original_message: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_ticket(
        &self,
        staff_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError>;
    async fn send_confirmation(
        &self,
        user_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError>;
}

/// Used when notifications are switched off. Every send reports `Disabled`.
#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_ticket(
        &self,
        _staff_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        info!(
            event_name = "notification.ticket.skipped",
            escalation_id = ticket.escalation_id.0,
            "notifications disabled; support ticket not sent"
        );
        Err(NotificationError::Disabled)
    }

    async fn send_confirmation(
        &self,
        _user_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        info!(
            event_name = "notification.confirmation.skipped",
            escalation_id = ticket.escalation_id.0,
            "notifications disabled; confirmation not sent"
        );
        Err(NotificationError::Disabled)
    }
}

const TICKET_SUBJECT: &str = "Support Ticket #{{ escalation_id }}: {{ user_name }}";
const TICKET_BODY: &str = "\
A new support ticket has been created.

Ticket ID: {{ escalation_id }}
User: {{ user_name }}
Phone: {{ user_address }}
Email: {{ user_email }}
Created: {{ created_at }}

Reason for escalation:
{{ reason }}

Original message:
{{ original_message }}
";
const CONFIRMATION_SUBJECT: &str = "Your support ticket #{{ escalation_id }} has been received";
const CONFIRMATION_BODY: &str = "\
Hello {{ user_name }},

Thank you for contacting IT Support. Your request has been logged as ticket #{{ escalation_id }}.

Your message:
{{ original_message }}

A member of our support team will contact you at this address shortly.

IT Support
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

/// The `support_ticket` and `ticket_confirmation` templates.
pub struct MailTemplates {
    tera: Tera,
}

impl MailTemplates {
    pub fn new() -> Result<Self, NotificationError> {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_templates(vec![
            ("support_ticket.subject", TICKET_SUBJECT),
            ("support_ticket.body", TICKET_BODY),
            ("ticket_confirmation.subject", CONFIRMATION_SUBJECT),
            ("ticket_confirmation.body", CONFIRMATION_BODY),
        ])
        .map_err(|error| NotificationError::Template(error.to_string()))?;
        Ok(Self { tera })
    }

    pub fn support_ticket(&self, ticket: &TicketDetails) -> Result<RenderedMail, NotificationError> {
        self.render("support_ticket", ticket)
    }

    pub fn ticket_confirmation(
        &self,
        ticket: &TicketDetails,
    ) -> Result<RenderedMail, NotificationError> {
        self.render("ticket_confirmation", ticket)
    }

    fn render(&self, name: &str, ticket: &TicketDetails) -> Result<RenderedMail, NotificationError> {
        let mut context = Context::from_serialize(ticket)
            .map_err(|error| NotificationError::Template(error.to_string()))?;
        context.insert("escalation_id", &ticket.escalation_id.0);
        context.insert("created_at", &ticket.created_at.format("%Y-%m-%d %H:%M UTC").to_string());

        let subject = self
            .tera
            .render(&format!("{name}.subject"), &context)
            .map_err(|error| NotificationError::Template(error.to_string()))?;
        let body = self
            .tera
            .render(&format!("{name}.body"), &context)
            .map_err(|error| NotificationError::Template(error.to_string()))?;
        Ok(RenderedMail { subject, body })
    }
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from_name: &'a str,
    from_address: &'a str,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    text: &'a str,
}

/// Delivers rendered mail through an HTTP mail relay.
pub struct HttpMailRelay {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<SecretString>,
    from_name: String,
    from_address: String,
    templates: MailTemplates,
}

impl HttpMailRelay {
    pub fn from_config(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let relay_url = config
            .relay_url
            .clone()
            .ok_or_else(|| NotificationError::Delivery("notification.relay_url is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| NotificationError::Delivery(error.to_string()))?;
        Ok(Self {
            client,
            relay_url,
            api_key: config.api_key.clone(),
            from_name: config.from_name.clone(),
            from_address: config.from_address.clone(),
            templates: MailTemplates::new()?,
        })
    }

    async fn deliver(
        &self,
        to: &str,
        reply_to: Option<&str>,
        mail: &RenderedMail,
    ) -> Result<(), NotificationError> {
        let payload = RelayRequest {
            from_name: &self.from_name,
            from_address: &self.from_address,
            to,
            reply_to,
            subject: &mail.subject,
            text: &mail.body,
        };
        let mut request = self.client.post(&self.relay_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response =
            request.send().await.map_err(|error| NotificationError::Delivery(error.to_string()))?;
        if !response.status().is_success() {
            return Err(NotificationError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpMailRelay {
    async fn send_ticket(
        &self,
        staff_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        let mail = self.templates.support_ticket(ticket)?;
        let result = self.deliver(staff_address, Some(&ticket.user_email), &mail).await;
        log_delivery("notification.ticket", ticket.escalation_id, &result);
        result
    }

    async fn send_confirmation(
        &self,
        user_address: &str,
        ticket: &TicketDetails,
    ) -> Result<(), NotificationError> {
        let mail = self.templates.ticket_confirmation(ticket)?;
        let result = self.deliver(user_address, None, &mail).await;
        log_delivery("notification.confirmation", ticket.escalation_id, &result);
        result
    }
}

fn log_delivery(kind: &str, escalation_id: EscalationId, result: &Result<(), NotificationError>) {
    match result {
        Ok(()) => info!(
            event_name = %format!("{kind}.sent"),
            escalation_id = escalation_id.0,
            "notification delivered"
        ),
        Err(error) => warn!(
            event_name = %format!("{kind}.failed"),
            escalation_id = escalation_id.0,
            error = %error,
            "notification delivery failed"
        ),
    }
}
