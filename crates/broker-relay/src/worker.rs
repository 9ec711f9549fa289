//! The delivery loop.

use crate::health::HealthHandle;
use crate::listener::{panic_message, ListenerSet};
use crate::record::{describe_item, DeliveryAttempt, OutboundRecord};
use crate::serializer::RecordSerializer;
use crate::strategy::DeliveryStrategy;
use crate::DeliveryError;
use futures_util::FutureExt;
use relay_config_and_utils::DeliveryLoopConfig;
use relay_queue_store::{DurableQueue, QueueError, QueueItem, QueueResult};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, trace, warn};

/// Run a queue operation on the blocking pool.
///
/// SQLite calls hold the store mutex and may fsync, so they stay off the
/// runtime's worker threads.
pub(crate) async fn on_blocking_pool<T, F>(queue: &Arc<dyn DurableQueue>, op: F) -> QueueResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn DurableQueue) -> QueueResult<T> + Send + 'static,
{
    let queue = Arc::clone(queue);
    tokio::task::spawn_blocking(move || op(queue.as_ref()))
        .await
        .map_err(|e| QueueError::Io(std::io::Error::other(e)))?
}

/// What one pass of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// An item was consumed and handed to the strategy.
    Delivered,
    /// The queue looked non-empty but had nothing to consume.
    Raced,
    Empty,
    BrokerDown,
    /// The queue store failed; treated like an empty queue.
    StorageFault,
}

/// Single worker draining one topic queue into the broker.
pub(crate) struct DeliveryWorker<V> {
    pub(crate) queue: Arc<dyn DurableQueue>,
    pub(crate) serializer: Arc<dyn RecordSerializer<V>>,
    pub(crate) strategy: Arc<DeliveryStrategy>,
    pub(crate) health: HealthHandle,
    pub(crate) listeners: Arc<ListenerSet>,
    pub(crate) wakeup: Arc<Notify>,
    pub(crate) stop: watch::Receiver<bool>,
    pub(crate) config: DeliveryLoopConfig,
}

impl<V> DeliveryWorker<V>
where
    V: Serialize + Send + 'static,
{
    /// Run until the stop signal is observed.
    ///
    /// Each pass:
    /// 1. Waits (without consuming) while the queue is empty
    /// 2. Waits (without consuming) while the broker is unreachable
    /// 3. Consumes the oldest item
    /// 4. Notifies `before_send`, delivers, notifies `after_send`
    pub(crate) async fn run(mut self) {
        let topic = self.queue.topic().to_string();
        info!(topic = %topic, "Delivery loop started");

        while !self.stop_requested() {
            match self.run_once().await {
                Pass::Delivered | Pass::Raced => {}
                Pass::Empty | Pass::StorageFault => {
                    let idle = self.config.idle_poll_interval();
                    self.idle(idle, true).await;
                }
                Pass::BrokerDown => {
                    let backoff = self.config.unreachable_backoff();
                    self.idle(backoff, false).await;
                }
            }
        }

        info!(topic = %topic, "Delivery loop stopped");
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    /// Sleep up to `max`, returning early on shutdown and, if asked, on enqueue.
    async fn idle(&mut self, max: Duration, wake_on_enqueue: bool) {
        let max = max.max(Duration::from_millis(1));
        if wake_on_enqueue {
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(max) => {}
                _ = self.stop.changed() => {}
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(max) => {}
                _ = self.stop.changed() => {}
            }
        }
    }

    async fn run_once(&self) -> Pass {
        let topic = self.queue.topic();

        match on_blocking_pool(&self.queue, |queue| queue.is_empty()).await {
            Ok(true) => return Pass::Empty,
            Ok(false) => {}
            Err(e) => {
                warn!(topic = %topic, error = %e, "Queue emptiness check failed");
                return Pass::StorageFault;
            }
        }

        if !self.health.is_reachable() {
            trace!(topic = %topic, "Broker unreachable, leaving backlog in place");
            return Pass::BrokerDown;
        }

        let item = match on_blocking_pool(&self.queue, |queue| queue.consume()).await {
            Ok(Some(item)) => item,
            Ok(None) => return Pass::Raced,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Queue consume failed");
                return Pass::StorageFault;
            }
        };

        let index = item.index;
        self.listeners.before_send(index);
        self.dispatch(item).await;
        self.listeners.after_send(index);

        Pass::Delivered
    }

    async fn dispatch(&self, item: QueueItem) {
        let topic = self.queue.topic();
        let index = item.index;

        let prepared = panic::catch_unwind(AssertUnwindSafe(|| self.prepare(item)))
            .unwrap_or_else(|payload| Err(DeliveryError::Panicked(panic_message(payload.as_ref()))));
        let attempt = match prepared {
            Ok(attempt) => attempt,
            Err(err) => {
                error!(topic = %topic, index, error = %err, "Dropping undeliverable record");
                self.listeners.on_send_fail(topic, &describe_item(index, None), &err);
                return;
            }
        };

        debug!(topic = %topic, index, key = %attempt.record.key, "Delivering record");
        let message = attempt.describe();
        let delivery = self
            .strategy
            .deliver(attempt, &self.queue, &self.listeners);

        if let Err(payload) = AssertUnwindSafe(delivery).catch_unwind().await {
            let err = DeliveryError::Panicked(panic_message(payload.as_ref()));
            error!(topic = %topic, index, error = %err, "Delivery strategy panicked");
            self.listeners.on_send_fail(topic, &message, &err);
        }
    }

    /// Decode the payload and map it to the broker wire form. Runs caller
    /// code (serializer and `Serialize` impls), so `dispatch` guards it
    /// against panics.
    fn prepare(&self, item: QueueItem) -> Result<DeliveryAttempt, DeliveryError> {
        let record = self
            .serializer
            .deserialize(&item.payload)
            .map_err(DeliveryError::Decode)?;
        let record =
            OutboundRecord::from_record(self.queue.topic(), record).map_err(DeliveryError::WireMapping)?;

        Ok(DeliveryAttempt {
            index: item.index,
            payload: item.payload,
            record,
        })
    }
}
