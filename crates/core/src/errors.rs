use thiserror::Error;

use crate::domain::escalation::EscalationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid email address `{0}`")]
    InvalidEmail(String),
    #[error("invalid contact address `{0}`")]
    InvalidAddress(String),
    #[error("invalid escalation transition from {from:?} to {to:?}")]
    InvalidEscalationTransition { from: EscalationStatus, to: EscalationStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("data integrity failure: {0}")]
    DataIntegrity(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// How a failure is contained inside a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Corrective prompt to the user, no state change.
    Validation,
    /// Logged, degraded fallback.
    TransientDependency,
    /// Narrow fallback path when one is known, otherwise a failed step.
    DataIntegrity,
    /// Routed to the escalation handler or the generic apology.
    Unrecoverable,
}

impl ApplicationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(_) => ErrorClass::Validation,
            Self::Persistence(_) | Self::Integration(_) => ErrorClass::TransientDependency,
            Self::DataIntegrity(_) => ErrorClass::DataIntegrity,
            Self::Configuration(_) => ErrorClass::Unrecoverable,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

pub const GENERIC_APOLOGY: &str =
    "Sorry, I encountered an error processing your message. Please try again later.";

impl InterfaceError {
    /// Text that is safe to send to an end user over the messaging channel.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "Sorry, I couldn't process that message. Please check it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "Sorry, the service is temporarily unavailable. Please try again shortly."
            }
            Self::Internal { .. } => GENERIC_APOLOGY,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::DataIntegrity(message) | ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
