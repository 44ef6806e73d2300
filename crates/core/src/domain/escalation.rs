use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::MessageId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EscalationId(pub i64);

impl fmt::Display for EscalationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EscalationId {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse::<i64>().map(Self).map_err(|_| {
            DomainError::InvariantViolation(format!("`{value}` is not an escalation id"))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationStatus {
    Pending,
    EmailProvided,
    Resolved,
}

impl EscalationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::EmailProvided => "email_provided",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "email_provided" => Some(Self::EmailProvided),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Statuses an escalation may move out of to reach `self`.
    pub fn predecessors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[],
            Self::EmailProvided => &[Self::Pending],
            Self::Resolved => &[Self::Pending, Self::EmailProvided],
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        next.predecessors().contains(&self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub user_id: UserId,
    pub message_id: Option<MessageId>,
    pub status: EscalationStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn transition_to(
        &mut self,
        next: EscalationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidEscalationTransition { from: self.status, to: next });
        }

        self.status = next;
        if next == EscalationStatus::Resolved {
            self.resolved_at = Some(at);
        }
        Ok(())
    }
}

/// Which insert path produced an escalation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationSchema {
    Full,
    /// The store predates the `resolved_at` column.
    LegacyWithoutResolvedAt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationCreated {
    pub id: EscalationId,
    pub schema: EscalationSchema,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Escalation, EscalationId, EscalationStatus};
    use crate::domain::user::UserId;
    use crate::errors::DomainError;

    fn pending() -> Escalation {
        Escalation {
            id: EscalationId(7),
            user_id: UserId(1),
            message_id: None,
            status: EscalationStatus::Pending,
            reason: "requested a human".to_string(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn pending_moves_to_email_provided_then_resolved() {
        let mut escalation = pending();
        escalation.transition_to(EscalationStatus::EmailProvided, Utc::now()).expect("allowed");
        assert!(escalation.resolved_at.is_none());

        escalation.transition_to(EscalationStatus::Resolved, Utc::now()).expect("allowed");
        assert!(escalation.resolved_at.is_some());
    }

    #[test]
    fn resolved_is_terminal() {
        let mut escalation = pending();
        escalation.transition_to(EscalationStatus::Resolved, Utc::now()).expect("allowed");

        let error = escalation.transition_to(EscalationStatus::Pending, Utc::now());
        assert!(matches!(
            error,
            Err(DomainError::InvalidEscalationTransition {
                from: EscalationStatus::Resolved,
                to: EscalationStatus::Pending
            })
        ));
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in
            [EscalationStatus::Pending, EscalationStatus::EmailProvided, EscalationStatus::Resolved]
        {
            assert_eq!(EscalationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EscalationStatus::parse("closed"), None);
    }

    #[test]
    fn escalation_id_parses_from_state_payload() {
        assert_eq!(" 42 ".parse::<EscalationId>(), Ok(EscalationId(42)));
        assert!("ticket-42".parse::<EscalationId>().is_err());
    }
}
