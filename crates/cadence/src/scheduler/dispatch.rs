use super::domain::{ActionType, CompanyId, ContactPoint, DebtId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A rendered message ready for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub debt_id: DebtId,
    pub company_id: CompanyId,
    pub action: ActionType,
    pub contact: ContactPoint,
    pub subject: Option<String>,
    pub body: String,
}

/// Failure classification reported by a channel adapter. Transient
/// failures (timeouts, 5xx-equivalents) are retried with backoff;
/// permanent ones (invalid contact, explicit rejection) are not.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transient send failure: {0}")]
    Transient(String),
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

/// Uniform contract over the external email/SMS/WhatsApp/voice gateways.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}

/// Capability registry mapping each action type to its adapter.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: HashMap<ActionType, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, action: ActionType, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(action, adapter);
        self
    }

    pub fn adapter(&self, action: ActionType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&action).cloned()
    }
}

/// Result of dispatching one message, including how many attempts were
/// consumed (committed to the ledger for the audit trail).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Sent {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
        permanent: bool,
    },
}

/// Sends a rendered message through the step's channel, retrying
/// transient failures with exponential backoff within the pass.
pub struct Dispatcher {
    registry: ChannelRegistry,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Dispatcher {
    pub fn new(registry: ChannelRegistry, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            registry,
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub async fn dispatch(&self, message: &OutboundMessage) -> DispatchResult {
        let Some(adapter) = self.registry.adapter(message.action) else {
            warn!(
                action = message.action.label(),
                debt = %message.debt_id.0,
                "no channel adapter registered"
            );
            return DispatchResult::Failed {
                attempts: 1,
                reason: format!("no adapter registered for {}", message.action.label()),
                permanent: true,
            };
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match adapter.send(message).await {
                Ok(()) => {
                    debug!(
                        action = message.action.label(),
                        debt = %message.debt_id.0,
                        attempt,
                        "message dispatched"
                    );
                    return DispatchResult::Sent { attempts: attempt };
                }
                Err(SendError::Permanent(reason)) => {
                    return DispatchResult::Failed {
                        attempts: attempt,
                        reason,
                        permanent: true,
                    };
                }
                Err(SendError::Transient(reason)) => {
                    if attempt >= self.max_attempts {
                        return DispatchResult::Failed {
                            attempts: attempt,
                            reason,
                            permanent: false,
                        };
                    }
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    debug!(
                        action = message.action.label(),
                        debt = %message.debt_id.0,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient send failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
