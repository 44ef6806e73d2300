use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    FromUser,
    FromBot,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FromUser => "user",
            Self::FromBot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::FromUser),
            "bot" => Some(Self::FromBot),
            _ => None,
        }
    }

    /// Prefix used when the message is rendered into prompt context.
    pub fn label(self) -> &'static str {
        match self {
            Self::FromUser => "User",
            Self::FromBot => "Bot",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub body: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub user_id: UserId,
    pub body: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn inbound(user_id: UserId, body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { user_id, body: body.into(), direction: Direction::FromUser, created_at }
    }

    pub fn reply(user_id: UserId, body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { user_id, body: body.into(), direction: Direction::FromBot, created_at }
    }
}
