use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use helpline_core::address::AddressNormalizer;
use helpline_core::config::ChannelConfig;
use helpline_core::errors::GENERIC_APOLOGY;

use crate::events::{EventContext, InboundMessage, InboundMessageService};
use crate::transport::{MessagingTransport, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub max_concurrent_users: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            max_concurrent_users: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_concurrent_users: config.max_concurrent_users.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_backoff_ms.saturating_mul(multiplier).min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub senders: usize,
    pub replied: usize,
    pub handler_failures: usize,
    pub send_failures: usize,
}

impl BatchReport {
    fn absorb(&mut self, other: BatchReport) {
        self.replied += other.replied;
        self.handler_failures += other.handler_failures;
        self.send_failures += other.send_failures;
    }
}

/// Polls the gateway, hands each message to the service and sends the reply.
/// Messages from one sender run strictly in order; different senders run
/// concurrently up to `max_concurrent_users`.
pub struct PollingRunner {
    transport: Arc<dyn MessagingTransport>,
    service: Arc<dyn InboundMessageService>,
    policy: PollPolicy,
    normalizer: AddressNormalizer,
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        service: Arc<dyn InboundMessageService>,
        policy: PollPolicy,
    ) -> Self {
        Self { transport, service, policy, normalizer: AddressNormalizer::default() }
    }

    pub fn with_normalizer(mut self, normalizer: AddressNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "channel.poll.started",
            poll_interval_ms = self.policy.poll_interval.as_millis() as u64,
            max_concurrent_users = self.policy.max_concurrent_users,
            "message polling started"
        );
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.received > 0 {
                        info!(
                            event_name = "channel.poll.batch_processed",
                            received = report.received,
                            senders = report.senders,
                            replied = report.replied,
                            handler_failures = report.handler_failures,
                            send_failures = report.send_failures,
                            "processed unread batch"
                        );
                    }
                    self.policy.poll_interval
                }
                Err(error) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.policy.backoff(consecutive_failures).max(self.policy.poll_interval);
                    warn!(
                        event_name = "channel.poll.fetch_failed",
                        consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "failed to fetch unread messages; continuing poll loop"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "channel.poll.stopped", "message polling stopped");
    }

    pub async fn poll_once(&self) -> Result<BatchReport, TransportError> {
        let messages = self.transport.fetch_unread().await?;
        let groups = group_by_sender(&self.normalizer, messages);
        let mut report = BatchReport {
            received: groups.iter().map(|(_, batch)| batch.len()).sum(),
            senders: groups.len(),
            ..BatchReport::default()
        };
        if groups.is_empty() {
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.policy.max_concurrent_users.max(1)));
        let mut tasks = JoinSet::new();
        for (sender, batch) in groups {
            let permits = permits.clone();
            let transport = self.transport.clone();
            let service = self.service.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                process_sender(transport, service, &sender, batch).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sender_report) => report.absorb(sender_report),
                Err(error) => {
                    report.handler_failures += 1;
                    warn!(
                        event_name = "channel.poll.task_failed",
                        error = %error,
                        "sender task aborted"
                    );
                }
            }
        }

        Ok(report)
    }
}

async fn process_sender(
    transport: Arc<dyn MessagingTransport>,
    service: Arc<dyn InboundMessageService>,
    sender: &str,
    batch: Vec<InboundMessage>,
) -> BatchReport {
    let mut report = BatchReport::default();

    for message in batch {
        let context = EventContext::for_message(&message);
        debug!(
            event_name = "channel.poll.message_received",
            correlation_id = %context.correlation_id,
            sender,
            "received inbound message"
        );

        let reply = match service.handle_message(&message, &context).await {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(error) => {
                report.handler_failures += 1;
                warn!(
                    event_name = "channel.poll.handler_failed",
                    correlation_id = %context.correlation_id,
                    sender,
                    error = %error,
                    "message handler failed; sending apology"
                );
                GENERIC_APOLOGY.to_string()
            }
        };

        match transport.send_message(&message.sender, &reply, message.correlation_id.as_deref()).await {
            Ok(()) => report.replied += 1,
            Err(error) => {
                report.send_failures += 1;
                warn!(
                    event_name = "channel.send.failed",
                    correlation_id = %context.correlation_id,
                    sender,
                    error = %error,
                    "failed to deliver reply"
                );
            }
        }
    }

    report
}

/// Groups messages by normalized sender address, keeping first-seen sender
/// order and per-sender message order. Addresses that fail to normalize are
/// keyed on their raw text.
pub fn group_by_sender(
    normalizer: &AddressNormalizer,
    messages: Vec<InboundMessage>,
) -> Vec<(String, Vec<InboundMessage>)> {
    let mut groups: Vec<(String, Vec<InboundMessage>)> = Vec::new();
    for message in messages {
        let key = normalizer.normalize(&message.sender).unwrap_or_else(|_| message.sender.clone());
        match groups.iter_mut().find(|(sender, _)| *sender == key) {
            Some((_, batch)) => batch.push(message),
            None => groups.push((key, vec![message])),
        }
    }
    groups
}
