use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Conversation,
    Escalation,
    Notification,
    Retention,
    System,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Escalation => "escalation",
            Self::Notification => "notification",
            Self::Retention => "retention",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Degraded,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

/// Durable record written to the chatbot log table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub user_id: Option<UserId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub summary: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        user_id: Option<UserId>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            outcome,
            summary: summary.into(),
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Metadata blob stored next to the summary, including the correlation fields.
    pub fn metadata_json(&self) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        fields.insert("event_id".to_string(), self.event_id.clone().into());
        fields.insert("correlation_id".to_string(), self.correlation_id.clone().into());
        fields.insert("category".to_string(), self.category.as_str().into());
        fields.insert("outcome".to_string(), self.outcome.as_str().into());
        if let Some(user_id) = self.user_id {
            fields.insert("user_id".to_string(), user_id.0.into());
        }
        for (key, value) in &self.metadata {
            fields.insert(key.clone(), value.clone().into());
        }
        serde_json::Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
    use crate::domain::user::UserId;

    #[test]
    fn metadata_json_carries_correlation_fields() {
        let event = AuditEvent::new(
            Some(UserId(9)),
            "wamid-123",
            "escalation.created",
            AuditCategory::Escalation,
            AuditOutcome::Success,
            "Escalation 4 created",
        )
        .with_metadata("escalation_id", "4")
        .with_metadata("reason", "repetition");

        let json = event.metadata_json();
        assert_eq!(json["correlation_id"], "wamid-123");
        assert_eq!(json["user_id"], 9);
        assert_eq!(json["escalation_id"], "4");
        assert_eq!(json["category"], "escalation");
        assert_eq!(json["outcome"], "success");
    }
}
