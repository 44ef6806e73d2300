use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use helpline_core::config::ChannelConfig;

use crate::chunk::split_message;
use crate::events::InboundMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport fetch failed: {0}")]
    Fetch(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport payload could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, TransportError>;
    /// `correlation_id` lets the gateway mark the original message as answered.
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        correlation_id: Option<&str>,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Deserialize)]
struct UnreadEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    response: Vec<UnreadMessage>,
}

#[derive(Debug, Deserialize)]
struct UnreadMessage {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    phone: &'a str,
    #[serde(rename = "isGroup")]
    is_group: bool,
    message: &'a str,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
}

/// WPPConnect-style HTTP gateway.
pub struct HttpGatewayTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: SecretString,
    max_message_length: usize,
}

impl HttpGatewayTransport {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: SecretString,
        max_message_length: usize,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Fetch(error.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, auth_token, max_message_length })
    }

    pub fn from_config(config: &ChannelConfig) -> Result<Self, TransportError> {
        Self::new(
            config.base_url.clone(),
            config.auth_token.clone(),
            config.max_message_length,
            Duration::from_secs(30),
        )
    }

    async fn post_chunk(
        &self,
        recipient: &str,
        chunk: &str,
        correlation_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let request = SendMessageRequest {
            phone: recipient,
            is_group: false,
            message: chunk,
            message_id: correlation_id,
        };
        let response = self
            .client
            .post(format!("{}/send-message", self.base_url))
            .bearer_auth(self.auth_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Send(format!("gateway returned {}", response.status())));
        }
        Ok(())
    }
}

fn unread_into_messages(envelope: UnreadEnvelope) -> Result<Vec<InboundMessage>, TransportError> {
    if let Some(status) = envelope.status.as_deref() {
        if status != "success" {
            return Err(TransportError::Fetch(format!("gateway reported status `{status}`")));
        }
    }

    Ok(envelope
        .response
        .into_iter()
        .filter_map(|message| {
            let sender = message.from.map(|value| value.trim().to_string())?;
            let text = message.body.map(|value| value.trim().to_string())?;
            if sender.is_empty() || text.is_empty() {
                return None;
            }
            Some(InboundMessage {
                sender,
                text,
                correlation_id: message.message_id.filter(|id| !id.trim().is_empty()),
            })
        })
        .collect())
}

#[async_trait]
impl MessagingTransport for HttpGatewayTransport {
    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, TransportError> {
        let response = self
            .client
            .get(format!("{}/all-unread-messages", self.base_url))
            .bearer_auth(self.auth_token.expose_secret())
            .send()
            .await
            .map_err(|error| TransportError::Fetch(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Fetch(format!("gateway returned {}", response.status())));
        }

        let envelope: UnreadEnvelope =
            response.json().await.map_err(|error| TransportError::Decode(error.to_string()))?;
        unread_into_messages(envelope)
    }

    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        correlation_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let chunks = split_message(text, self.max_message_length);
        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_correlation = if index == 0 { correlation_id } else { None };
            self.post_chunk(recipient, chunk, chunk_correlation).await?;
            debug!(
                event_name = "channel.send.chunk",
                recipient,
                chunk = index + 1,
                total,
                "sent reply chunk"
            );
        }
        Ok(())
    }
}
