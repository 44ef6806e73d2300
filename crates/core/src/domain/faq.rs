use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaqId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub id: FaqId,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
}

impl FaqEntry {
    /// Case-insensitive containment in either direction. Queries shorter than
    /// `min_query_chars` never match so that "hi" does not hit every question.
    pub fn matches(&self, query: &str, min_query_chars: usize) -> bool {
        let query = query.trim().to_lowercase();
        if query.chars().count() < min_query_chars {
            return false;
        }
        let question = self.question.trim().to_lowercase();
        if question.is_empty() {
            return false;
        }
        question.contains(&query) || query.contains(&question)
    }
}
