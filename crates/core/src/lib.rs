pub mod address;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod policy;
pub mod quality;
pub mod timestamp;

pub use address::AddressNormalizer;
pub use audit::{AuditCategory, AuditEvent, AuditOutcome};
pub use domain::conversation::{ConversationState, StateTag};
pub use domain::escalation::{
    Escalation, EscalationCreated, EscalationId, EscalationSchema, EscalationStatus,
};
pub use domain::faq::{FaqEntry, FaqId};
pub use domain::message::{ChatMessage, Direction, MessageId, NewMessage};
pub use domain::user::{EmailAddress, SupportContact, User, UserId};
pub use errors::{ApplicationError, DomainError, ErrorClass, InterfaceError};
pub use policy::{EscalationDecision, EscalationReason, EscalationRules};
pub use quality::QualityHeuristic;
