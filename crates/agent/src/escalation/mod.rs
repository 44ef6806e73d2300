pub mod evaluator;
pub mod handler;

pub use evaluator::EscalationEvaluator;
pub use handler::{EscalationHandler, EMAIL_RETRY_PROMPT, ESCALATION_FALLBACK};
