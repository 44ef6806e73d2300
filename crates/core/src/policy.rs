use std::collections::HashSet;
use std::fmt;

use crate::config::ConversationConfig;
use crate::quality::{normalize_text, normalized_phrases};

const STUCK_WINDOW: usize = 3;
const SHORT_MESSAGE_CHARS: usize = 15;
const TOKEN_OVERLAP_THRESHOLD: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationReason {
    TriggerPhrase(String),
    ConsecutiveFailures(u32),
    Repetition,
    LongConversation(i64),
    Frustration(String),
    InternalError,
}

impl EscalationReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TriggerPhrase(_) => "trigger_phrase",
            Self::ConsecutiveFailures(_) => "consecutive_failures",
            Self::Repetition => "repetition",
            Self::LongConversation(_) => "long_conversation",
            Self::Frustration(_) => "frustration",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggerPhrase(phrase) => write!(f, "User requested human support: '{phrase}'"),
            Self::ConsecutiveFailures(count) => {
                write!(f, "Multiple failed responses ({count} consecutive)")
            }
            Self::Repetition => f.write_str("User appears stuck (repetition)"),
            Self::LongConversation(count) => {
                write!(f, "Long unresolved conversation ({count} messages)")
            }
            Self::Frustration(indicator) => write!(f, "User frustration detected: '{indicator}'"),
            Self::InternalError => f.write_str("Internal error while processing message"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationDecision {
    Continue,
    Escalate(EscalationReason),
}

impl EscalationDecision {
    pub fn should_escalate(&self) -> bool {
        matches!(self, Self::Escalate(_))
    }
}

/// Pure checks behind each escalation rule. Ordering and persistence live in
/// the agent's evaluator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationRules {
    end_phrases: Vec<String>,
    trigger_phrases: Vec<String>,
    frustration_phrases: Vec<String>,
    failure_threshold: u32,
    long_conversation_threshold: i64,
}

impl EscalationRules {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            end_phrases: normalized_phrases(&config.end_phrases),
            trigger_phrases: normalized_phrases(&config.escalation_phrases),
            frustration_phrases: normalized_phrases(&config.frustration_phrases),
            failure_threshold: config.max_consecutive_failures,
            long_conversation_threshold: config.long_conversation_threshold,
        }
    }

    /// Exact match after trim, ignoring case.
    pub fn is_end_phrase(&self, message: &str) -> bool {
        let lowered = normalize_text(message);
        self.end_phrases.iter().any(|phrase| *phrase == lowered)
    }

    pub fn trigger_phrase(&self, message: &str) -> Option<&str> {
        find_phrase(&self.trigger_phrases, message)
    }

    pub fn frustration_indicator(&self, message: &str) -> Option<&str> {
        find_phrase(&self.frustration_phrases, message)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn failures_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.failure_threshold
    }

    pub fn is_long_conversation(&self, message_count: i64) -> bool {
        message_count > self.long_conversation_threshold
    }

    /// `recent_inbound` is chronological; only the last three messages count,
    /// fewer when fewer exist.
    pub fn is_stuck(&self, recent_inbound: &[String]) -> bool {
        let start = recent_inbound.len().saturating_sub(STUCK_WINDOW);
        let window = &recent_inbound[start..];
        window.windows(2).any(|pair| messages_similar(&pair[0], &pair[1]))
    }
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

fn find_phrase<'a>(phrases: &'a [String], message: &str) -> Option<&'a str> {
    let lowered = normalize_text(message);
    phrases.iter().find(|phrase| lowered.contains(phrase.as_str())).map(String::as_str)
}

pub fn messages_similar(left: &str, right: &str) -> bool {
    let left = normalize_text(left);
    let right = normalize_text(right);
    if left == right {
        return true;
    }

    if left.chars().count() >= SHORT_MESSAGE_CHARS || right.chars().count() >= SHORT_MESSAGE_CHARS
    {
        return false;
    }

    let left_tokens: HashSet<&str> = left.split_whitespace().collect();
    let right_tokens: HashSet<&str> = right.split_whitespace().collect();
    let largest = left_tokens.len().max(right_tokens.len());
    if largest == 0 {
        return false;
    }
    let shared = left_tokens.intersection(&right_tokens).count();
    (shared as f64 / largest as f64) > TOKEN_OVERLAP_THRESHOLD
}
