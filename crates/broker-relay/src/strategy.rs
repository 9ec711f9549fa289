//! Delivery strategies.
//!
//! A strategy owns the broker client for a pipeline. It decides how a record
//! is sent, what counts as success, and releases the client on `clear()`.
//! `deliver` never returns an error: every outcome goes to the listeners.

use crate::broker::{BrokerAck, BrokerClient};
use crate::listener::ListenerSet;
use crate::record::{DeliveryAttempt, OutboundRecord};
use crate::worker::on_blocking_pool;
use crate::{BrokerError, DeliveryError};
use relay_config_and_utils::ReliableConfig;
use relay_queue_store::DurableQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Which strategy a pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStrategyKind {
    /// Wait for a broker acknowledgement, retrying with backoff.
    #[default]
    Reliable,
    /// Submit without waiting; report success optimistically.
    Fast,
}

/// Broker client that is closed at most once.
struct BrokerSlot {
    broker: Arc<dyn BrokerClient>,
    cleared: AtomicBool,
}

impl BrokerSlot {
    fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            cleared: AtomicBool::new(false),
        }
    }

    fn clear(&self) -> bool {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.broker.close();
        info!("Broker client closed");
        true
    }
}

/// Acknowledged delivery with bounded retries.
pub struct ReliableDelivery {
    slot: BrokerSlot,
    config: ReliableConfig,
}

impl ReliableDelivery {
    async fn deliver(&self, attempt: DeliveryAttempt, queue: &Arc<dyn DurableQueue>, listeners: &ListenerSet) {
        let topic = attempt.record.topic.as_str();

        match self.send_with_retry(&attempt.record).await {
            Ok(ack) => {
                debug!(topic = %topic, index = attempt.index, offset = ack.offset, "Record acknowledged");
                listeners.on_send_success(topic, Some(ack.offset));
            }
            Err(err) => {
                let message = attempt.describe();
                error!(topic = %topic, index = attempt.index, error = %err, "Reliable delivery failed");
                listeners.on_send_fail(topic, &message, &err);

                let exhausted = matches!(err, DeliveryError::RetriesExhausted { .. });
                if exhausted && self.config.requeue_exhausted {
                    self.requeue(&attempt, queue, listeners).await;
                }
            }
        }
    }

    async fn requeue(&self, attempt: &DeliveryAttempt, queue: &Arc<dyn DurableQueue>, listeners: &ListenerSet) {
        let topic = attempt.record.topic.as_str();
        let payload = attempt.payload.clone();
        match on_blocking_pool(queue, move |queue| queue.enqueue(&payload)).await {
            Ok(new_index) => {
                warn!(topic = %topic, index = attempt.index, new_index, "Requeued undelivered record at tail");
            }
            Err(e) => {
                let err = DeliveryError::Requeue(e);
                error!(topic = %topic, index = attempt.index, error = %err, "Record lost after retries");
                listeners.on_send_fail(topic, &attempt.describe(), &err);
            }
        }
    }

    async fn send_with_retry(&self, record: &OutboundRecord) -> Result<BrokerAck, DeliveryError> {
        let max_attempts = self.config.max_retries.max(1);
        let ack_timeout = self.config.ack_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(ack_timeout, self.slot.broker.send(record)).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Timeout(ack_timeout)),
            };

            match result {
                Ok(ack) => return Ok(ack),
                Err(e) if !e.is_retryable() => return Err(DeliveryError::Broker(e)),
                Err(e) if attempt >= max_attempts => {
                    return Err(DeliveryError::RetriesExhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    let delay = self.config.backoff_for_attempt(attempt);
                    warn!(
                        topic = %record.topic,
                        key = %record.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Fire-and-forget delivery.
pub struct FastDelivery {
    slot: BrokerSlot,
}

impl FastDelivery {
    fn deliver(&self, attempt: DeliveryAttempt, listeners: &ListenerSet) {
        let message = attempt.describe();
        let DeliveryAttempt { index, record, .. } = attempt;
        let topic = record.topic.clone();

        match self.slot.broker.submit(record) {
            Ok(()) => listeners.on_send_success(&topic, None),
            Err(e) => {
                let err = DeliveryError::Broker(e);
                error!(topic = %topic, index, error = %err, "Fast submission failed");
                listeners.on_send_fail(&topic, &message, &err);
            }
        }
    }
}

/// The strategy a pipeline delivers with.
pub enum DeliveryStrategy {
    Reliable(ReliableDelivery),
    Fast(FastDelivery),
}

impl DeliveryStrategy {
    pub fn new(kind: DeliveryStrategyKind, broker: Arc<dyn BrokerClient>, config: &ReliableConfig) -> Self {
        match kind {
            DeliveryStrategyKind::Reliable => Self::reliable(broker, config.clone()),
            DeliveryStrategyKind::Fast => Self::fast(broker),
        }
    }

    pub fn reliable(broker: Arc<dyn BrokerClient>, config: ReliableConfig) -> Self {
        Self::Reliable(ReliableDelivery {
            slot: BrokerSlot::new(broker),
            config,
        })
    }

    pub fn fast(broker: Arc<dyn BrokerClient>) -> Self {
        Self::Fast(FastDelivery {
            slot: BrokerSlot::new(broker),
        })
    }

    pub fn kind(&self) -> DeliveryStrategyKind {
        match self {
            Self::Reliable(_) => DeliveryStrategyKind::Reliable,
            Self::Fast(_) => DeliveryStrategyKind::Fast,
        }
    }

    /// Deliver one record and report the outcome to `listeners`.
    pub async fn deliver(&self, attempt: DeliveryAttempt, queue: &Arc<dyn DurableQueue>, listeners: &ListenerSet) {
        match self {
            Self::Reliable(reliable) => reliable.deliver(attempt, queue, listeners).await,
            Self::Fast(fast) => fast.deliver(attempt, listeners),
        }
    }

    /// Close the broker client. Returns `false` if it was already closed.
    pub fn clear(&self) -> bool {
        self.slot().clear()
    }

    pub fn is_cleared(&self) -> bool {
        self.slot().cleared.load(Ordering::Acquire)
    }

    fn slot(&self) -> &BrokerSlot {
        match self {
            Self::Reliable(reliable) => &reliable.slot,
            Self::Fast(fast) => &fast.slot,
        }
    }
}
