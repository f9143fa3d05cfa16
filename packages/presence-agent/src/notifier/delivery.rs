//! Outbound delivery with a fixed retry budget.
//!
//! Each endpoint has its own queue and its own `DeliveryWorker`, so a slow or
//! failing endpoint delays only its own deliveries, and deliveries to one
//! endpoint keep the order they were emitted in.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use relay_client::{AckRequest, ActionRequest, RelayError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::kernel::BaseRelay;
use crate::supervisor::Service;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryPayload {
    Action(ActionRequest),
    Ack(AckRequest),
}

impl DeliveryPayload {
    fn describe(&self) -> String {
        match self {
            DeliveryPayload::Action(action) => format!("action {}", action.action),
            DeliveryPayload::Ack(ack) => format!("ack {} ({})", ack.request_id, ack.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTask {
    pub payload: DeliveryPayload,
    pub endpoint: String,
    pub attempt_count: u32,
}

impl DeliveryTask {
    pub fn new(payload: DeliveryPayload, endpoint: impl Into<String>) -> Self {
        Self {
            payload,
            endpoint: endpoint.into(),
            attempt_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct DeliveryWorker {
    name: String,
    endpoint: String,
    relay: Arc<dyn BaseRelay>,
    policy: DeliveryPolicy,
    rx: mpsc::UnboundedReceiver<DeliveryTask>,
}

impl DeliveryWorker {
    pub fn new(
        endpoint: impl Into<String>,
        relay: Arc<dyn BaseRelay>,
        policy: DeliveryPolicy,
    ) -> (Self, mpsc::UnboundedSender<DeliveryTask>) {
        let endpoint = endpoint.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            name: format!("delivery {}", endpoint),
            endpoint,
            relay,
            policy,
            rx,
        };
        (worker, tx)
    }

    /// Deliver one task, retrying up to the policy's attempt budget.
    pub async fn deliver(&self, task: &mut DeliveryTask) -> Result<(), AgentError> {
        loop {
            task.attempt_count += 1;

            let result = match &task.payload {
                DeliveryPayload::Action(body) => self.relay.post_action(&task.endpoint, body).await,
                DeliveryPayload::Ack(body) => self.relay.post_ack(&task.endpoint, body).await,
            };

            match result {
                Ok(()) => {
                    debug!(
                        endpoint = %task.endpoint,
                        payload = %task.payload.describe(),
                        attempt = task.attempt_count,
                        "delivered"
                    );
                    return Ok(());
                }
                Err(e) if task.attempt_count >= self.policy.attempts => {
                    return Err(AgentError::RemoteDelivery {
                        endpoint: task.endpoint.clone(),
                        attempts: task.attempt_count,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        endpoint = %task.endpoint,
                        payload = %task.payload.describe(),
                        attempt = task.attempt_count,
                        max_attempts = self.policy.attempts,
                        retry_in_ms = self.policy.retry_delay.as_millis() as u64,
                        error = %e,
                        kind = classify(&e),
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
impl DeliveryWorker {
    pub(crate) fn try_next(&mut self) -> Option<DeliveryTask> {
        self.rx.try_recv().ok()
    }
}

fn classify(e: &RelayError) -> &'static str {
    if e.is_connection() {
        "connection"
    } else {
        "response"
    }
}

#[async_trait]
impl Service for DeliveryWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(endpoint = %self.endpoint, "delivery worker starting");

        loop {
            let mut task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(endpoint = %self.endpoint, payload = %task.payload.describe(), "delivery abandoned at shutdown");
                    break;
                }
                result = self.deliver(&mut task) => {
                    if let Err(e) = result {
                        error!(error = %e, kind = %e.kind(), payload = %task.payload.describe(), "delivery dropped");
                    }
                }
            }
        }

        debug!(endpoint = %self.endpoint, "delivery worker stopped");
        Ok(())
    }
}
