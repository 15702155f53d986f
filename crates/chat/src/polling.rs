use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{ChatEvent, EventContext, EventDispatcher, HandlerResult, Update};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Source of inbound updates. `next_update` returns `None` only when the stream is closed.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_update(&self) -> Result<Option<Update>, TransportError>;
    /// Confirms `update_id`; the transport will not deliver it again.
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopUpdateTransport;

#[async_trait]
impl UpdateTransport for NoopUpdateTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<Update>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _update_id: i64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct PollingRunner {
    transport: Arc<dyn UpdateTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for PollingRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopUpdateTransport),
            dispatcher: Arc::new(EventDispatcher::default()),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "update transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "update transport retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening update transport");
        self.transport.connect().await?;
        info!(attempt, "update transport connected");

        loop {
            let Some(update) = self.transport.next_update().await? else {
                info!(attempt, "update stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let context = EventContext::for_update(&update);

            info!(
                event_name = "ingress.update_received",
                update_id = update.update_id,
                event_type = ?update.event.event_type(),
                correlation_id = %context.correlation_id,
                user_id = %sender_label(&update.event),
                "received chat update"
            );

            // Acknowledged before dispatch; a failing handler never sees the update twice.
            if let Err(error) = self.transport.acknowledge(update.update_id).await {
                warn!(
                    event_name = "ingress.ack_failed",
                    update_id = update.update_id,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "failed to acknowledge update"
                );
            }

            match self.dispatcher.dispatch(&update, &context).await {
                Ok(HandlerResult::Blocked) => debug!(
                    event_name = "ingress.update_blocked",
                    correlation_id = %context.correlation_id,
                    "update from banned sender dropped"
                ),
                Ok(_) => {}
                Err(error) => warn!(
                    event_name = "ingress.dispatch_failed",
                    update_id = update.update_id,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "event dispatch failed; continuing update loop"
                ),
            }
        }
    }
}

fn sender_label(event: &ChatEvent) -> String {
    event.sender().map(|sender| sender.user_id.to_string()).unwrap_or_else(|| "unknown".to_owned())
}
