use std::sync::OnceLock;

use regex::Regex;

use crate::config::ConversationConfig;

const COURTESY_TOKENS: &[&str] =
    &["hello", "hi", "hey", "thanks", "thank", "welcome", "cheers", "glad", "greetings"];

fn inability_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(cannot|can't|unable to)\b.*\b(process|understand|respond|help|assist)")
            .expect("INABILITY_PATTERN regex should compile")
    })
}

/// Heuristic classifier for generated answers. Deterministic and free of I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualityHeuristic {
    confusion_phrases: Vec<String>,
    min_length: usize,
}

impl QualityHeuristic {
    pub fn new(confusion_phrases: &[String], min_length: usize) -> Self {
        Self { confusion_phrases: normalized_phrases(confusion_phrases), min_length }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(&config.confusion_phrases, config.min_response_length)
    }

    pub fn is_low_quality(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return true;
        }

        let lowered = normalize_text(trimmed);
        if self.confusion_phrases.iter().any(|phrase| lowered.contains(phrase.as_str())) {
            return true;
        }

        if trimmed.chars().count() < self.min_length && !has_courtesy_token(&lowered) {
            return true;
        }

        inability_pattern().is_match(&lowered)
    }
}

impl Default for QualityHeuristic {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

/// Lowercases and folds typographic apostrophes so `can’t` matches `can't`.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

pub(crate) fn normalized_phrases(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|phrase| normalize_text(phrase))
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

fn has_courtesy_token(lowered: &str) -> bool {
    lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .any(|token| COURTESY_TOKENS.contains(&token))
}
