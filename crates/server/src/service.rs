use std::sync::Arc;

use async_trait::async_trait;
use helpline_agent::ConversationEngine;
use helpline_channel::{EventContext, HandlerError, InboundMessage, InboundMessageService};

/// Feeds gateway messages into the conversation engine.
pub struct EngineMessageService {
    engine: Arc<ConversationEngine>,
}

impl EngineMessageService {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl InboundMessageService for EngineMessageService {
    async fn handle_message(
        &self,
        message: &InboundMessage,
        ctx: &EventContext,
    ) -> Result<Option<String>, HandlerError> {
        let reply = self.engine.handle(&message.sender, &message.text, &ctx.correlation_id).await;
        Ok(Some(reply))
    }
}
