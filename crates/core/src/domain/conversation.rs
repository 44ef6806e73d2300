use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::escalation::EscalationId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateTag {
    None,
    AwaitingEmail,
}

impl StateTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AwaitingEmail => "awaiting_email",
        }
    }

    /// Unknown tags read back as `None`, which the engine treats as a normal turn.
    pub fn parse(value: &str) -> Self {
        match value {
            "awaiting_email" => Self::AwaitingEmail,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: UserId,
    pub tag: StateTag,
    pub payload: Option<String>,
    pub failure_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn is_awaiting_email(&self) -> bool {
        self.tag == StateTag::AwaitingEmail
    }

    /// The escalation an `AwaitingEmail` state points at, if the payload is usable.
    pub fn pending_escalation(&self) -> Option<EscalationId> {
        if !self.is_awaiting_email() {
            return None;
        }
        self.payload.as_deref().and_then(|payload| payload.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ConversationState, StateTag};
    use crate::domain::escalation::EscalationId;
    use crate::domain::user::UserId;

    fn state(tag: StateTag, payload: Option<&str>) -> ConversationState {
        ConversationState {
            user_id: UserId(3),
            tag,
            payload: payload.map(str::to_string),
            failure_count: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn awaiting_email_exposes_escalation_id() {
        assert_eq!(
            state(StateTag::AwaitingEmail, Some("12")).pending_escalation(),
            Some(EscalationId(12))
        );
    }

    #[test]
    fn broken_payload_yields_no_escalation() {
        assert_eq!(state(StateTag::AwaitingEmail, None).pending_escalation(), None);
        assert_eq!(state(StateTag::AwaitingEmail, Some("abc")).pending_escalation(), None);
        assert_eq!(state(StateTag::None, Some("12")).pending_escalation(), None);
    }

    #[test]
    fn unknown_tag_reads_as_none() {
        assert_eq!(StateTag::parse("awaiting_email"), StateTag::AwaitingEmail);
        assert_eq!(StateTag::parse("awaiting_name"), StateTag::None);
    }
}
