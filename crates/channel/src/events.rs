use async_trait::async_trait;
use thiserror::Error;

/// One unread message as delivered by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_message(message: &InboundMessage) -> Self {
        match &message.correlation_id {
            Some(id) if !id.trim().is_empty() => Self { correlation_id: id.clone() },
            _ => Self::default(),
        }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("message handler failure: {0}")]
    Message(String),
}

/// Turns one inbound message into the reply text, if any.
#[async_trait]
pub trait InboundMessageService: Send + Sync {
    async fn handle_message(
        &self,
        message: &InboundMessage,
        ctx: &EventContext,
    ) -> Result<Option<String>, HandlerError>;
}

#[derive(Default)]
pub struct NoopInboundMessageService;

#[async_trait]
impl InboundMessageService for NoopInboundMessageService {
    async fn handle_message(
        &self,
        _message: &InboundMessage,
        _ctx: &EventContext,
    ) -> Result<Option<String>, HandlerError> {
        Ok(None)
    }
}
