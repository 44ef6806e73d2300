use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Normalized contact address, unique per user.
    pub address: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_assistant: bool,
    pub awaiting_onboarding: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn needs_onboarding(&self) -> bool {
        self.awaiting_onboarding && !self.has_name()
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().map(|name| !name.trim().is_empty()).unwrap_or(false)
    }

    /// A user flagged for onboarding who already has a name is inconsistent.
    /// Returns true when the flag had to be cleared.
    pub fn repair_onboarding_flag(&mut self) -> bool {
        if self.awaiting_onboarding && self.has_name() {
            self.awaiting_onboarding = false;
            return true;
        }
        false
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or("there")
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|email| !email.trim().is_empty())
    }
}

/// A human staff member who can take over an escalated conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportContact {
    pub name: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress(String);

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("EMAIL_PATTERN regex should compile")
    })
}

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let candidate = raw.trim();
        if email_pattern().is_match(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(DomainError::InvalidEmail(candidate.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
