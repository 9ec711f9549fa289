//! Producer-facing pipeline.
//!
//! A `Pipeline` binds one topic to a durable queue, a broker client and a
//! delivery strategy. Building it starts two background tasks on the current
//! tokio runtime: the health monitor and the delivery worker.

use crate::broker::BrokerClient;
use crate::health::HealthMonitor;
use crate::listener::{DeliveryListener, ListenerSet, LoggingListener};
use crate::record::KvRecord;
use crate::serializer::{BinarySerializer, RecordSerializer};
use crate::strategy::{DeliveryStrategy, DeliveryStrategyKind};
use crate::worker::DeliveryWorker;
use crate::{EnqueueError, PipelineError, RelayResult};
use relay_config_and_utils::RelayConfig;
use relay_queue_store::{DurableQueue, QueueResult, QueueStore, TopicQueue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// How a call to [`Pipeline::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The delivery worker stopped within the shutdown timeout.
    Graceful,
    /// The worker was still busy when the timeout expired and was aborted.
    Aborted,
    /// The worker task had already died from a panic.
    WorkerPanicked,
    /// An earlier call already shut the pipeline down.
    AlreadyShutDown,
}

/// Durable, health-gated relay from producers to one broker topic.
pub struct Pipeline<V> {
    topic: String,
    queue: TopicQueue,
    serializer: Arc<dyn RecordSerializer<V>>,
    strategy: Arc<DeliveryStrategy>,
    health: HealthMonitor,
    wakeup: Arc<Notify>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl<V> Pipeline<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn builder() -> PipelineBuilder<V> {
        PipelineBuilder::new()
    }

    /// Reliable pipeline with default serializer, listener and tunables.
    pub fn create(topic: &str, store: Arc<QueueStore>, broker: Arc<dyn BrokerClient>) -> RelayResult<Self> {
        Self::create_reliable(topic, store, broker)
    }

    pub fn create_reliable(
        topic: &str,
        store: Arc<QueueStore>,
        broker: Arc<dyn BrokerClient>,
    ) -> RelayResult<Self> {
        Self::builder()
            .topic(topic)
            .queue_store(store)
            .broker(broker)
            .delivery_strategy(DeliveryStrategyKind::Reliable)
            .build()
    }

    pub fn create_fast(topic: &str, store: Arc<QueueStore>, broker: Arc<dyn BrokerClient>) -> RelayResult<Self> {
        Self::builder()
            .topic(topic)
            .queue_store(store)
            .broker(broker)
            .delivery_strategy(DeliveryStrategyKind::Fast)
            .build()
    }
}

impl<V> Pipeline<V> {
    /// Serialize a record and append it to the durable queue.
    ///
    /// Returns the queue index once the write is committed. Never talks to
    /// the broker and never waits for it.
    pub fn enqueue(&self, key: impl Into<String>, value: V) -> Result<u64, EnqueueError> {
        let record = KvRecord::new(key, value);
        let payload = self.serializer.serialize(&record)?;
        let index = self.queue.enqueue(&payload)?;
        debug!(topic = %self.topic, index, key = %record.key, "Record enqueued");
        self.wakeup.notify_one();
        Ok(index)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of records waiting in the durable queue.
    pub fn pending(&self) -> QueueResult<u64> {
        self.queue.len()
    }

    pub fn is_broker_reachable(&self) -> bool {
        self.health.is_reachable()
    }

    pub fn strategy_kind(&self) -> DeliveryStrategyKind {
        self.strategy.kind()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the pipeline.
    ///
    /// Signals the worker, then closes the queue store, clears the strategy
    /// (closing the broker client) and stops the health monitor, in that
    /// order. The worker gets the configured shutdown timeout to finish its
    /// in-flight record before it is aborted. Calling this more than once is
    /// harmless.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!(topic = %self.topic, "Pipeline already shut down");
            return ShutdownOutcome::AlreadyShutDown;
        }

        info!(topic = %self.topic, "Shutting down pipeline");
        let _ = self.stop.send(true);

        self.queue.store().close();
        self.strategy.clear();
        self.health.clear();

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let outcome = match worker {
            Some(mut worker) => {
                let joined = tokio::time::timeout(self.shutdown_timeout, &mut worker).await;
                match joined {
                    Ok(result) => worker_outcome(&self.topic, result),
                    Err(_) => {
                        warn!(
                            topic = %self.topic,
                            timeout_ms = self.shutdown_timeout.as_millis() as u64,
                            "Delivery loop did not stop in time, aborting"
                        );
                        worker.abort();
                        ShutdownOutcome::Aborted
                    }
                }
            }
            None => ShutdownOutcome::Graceful,
        };

        info!(topic = %self.topic, outcome = ?outcome, "Pipeline shut down");
        outcome
    }
}

fn worker_outcome(topic: &str, result: Result<(), JoinError>) -> ShutdownOutcome {
    match result {
        Ok(()) => ShutdownOutcome::Graceful,
        Err(e) if e.is_panic() => {
            warn!(topic = %topic, error = %e, "Delivery loop panicked before shutdown");
            ShutdownOutcome::WorkerPanicked
        }
        Err(e) => {
            warn!(topic = %topic, error = %e, "Delivery loop was cancelled before shutdown");
            ShutdownOutcome::Aborted
        }
    }
}

impl<V> Drop for Pipeline<V> {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            debug!(topic = %self.topic, "Pipeline dropped without shutdown, stopping tasks");
            let _ = self.stop.send(true);
            self.health.clear();
        }
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder<V> {
    topic: Option<String>,
    store: Option<Arc<QueueStore>>,
    broker: Option<Arc<dyn BrokerClient>>,
    serializer: Option<Arc<dyn RecordSerializer<V>>>,
    listeners: Vec<Arc<dyn DeliveryListener>>,
    strategy: DeliveryStrategyKind,
    config: RelayConfig,
}

impl<V> Default for PipelineBuilder<V> {
    fn default() -> Self {
        Self {
            topic: None,
            store: None,
            broker: None,
            serializer: None,
            listeners: Vec::new(),
            strategy: DeliveryStrategyKind::default(),
            config: RelayConfig::default(),
        }
    }
}

impl<V> PipelineBuilder<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination topic. Required.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Store holding the topic's durable queue. Required.
    pub fn queue_store(mut self, store: Arc<QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Broker client handed to the delivery strategy. Required.
    pub fn broker(mut self, broker: Arc<dyn BrokerClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Payload serializer. Defaults to [`BinarySerializer`].
    pub fn serializer(mut self, serializer: impl RecordSerializer<V> + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Add a listener. Listeners are notified in the order they are added.
    /// Without any, a [`LoggingListener`] is installed.
    pub fn listener(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn delivery_strategy(mut self, kind: DeliveryStrategyKind) -> Self {
        self.strategy = kind;
        self
    }

    /// Pacing, retry and probe settings.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the settings and start the pipeline's background tasks.
    pub fn build(self) -> RelayResult<Pipeline<V>> {
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or(PipelineError::MissingTopic)?;
        let store = self.store.ok_or(PipelineError::MissingQueueStore)?;
        let broker = self.broker.ok_or(PipelineError::MissingBroker)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PipelineError::NoRuntime);
        }

        let queue = store.queue(&topic)?;
        let serializer: Arc<dyn RecordSerializer<V>> = match self.serializer {
            Some(serializer) => serializer,
            None => Arc::new(BinarySerializer),
        };

        let listeners: ListenerSet = if self.listeners.is_empty() {
            std::iter::once(Arc::new(LoggingListener) as Arc<dyn DeliveryListener>).collect()
        } else {
            self.listeners.into_iter().collect()
        };

        let strategy = Arc::new(DeliveryStrategy::new(self.strategy, broker.clone(), &self.config.reliable));
        let health = HealthMonitor::start(broker, &self.config.health);
        let wakeup = Arc::new(Notify::new());
        let (stop, stop_rx) = watch::channel(false);

        let worker = DeliveryWorker {
            queue: Arc::new(queue.clone()),
            serializer: serializer.clone(),
            strategy: strategy.clone(),
            health: health.handle(),
            listeners: Arc::new(listeners),
            wakeup: wakeup.clone(),
            stop: stop_rx,
            config: self.config.delivery.clone(),
        };
        let worker = tokio::spawn(worker.run());

        info!(
            topic = %topic,
            strategy = ?self.strategy,
            "Pipeline started"
        );

        Ok(Pipeline {
            topic,
            queue,
            serializer,
            strategy,
            health,
            wakeup,
            stop,
            worker: Mutex::new(Some(worker)),
            shutdown_timeout: self.config.delivery.shutdown_timeout(),
            shut_down: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn worker_outcome_distinguishes_panics() {
        assert_eq!(worker_outcome("orders", Ok(())), ShutdownOutcome::Graceful);

        let worker: JoinHandle<()> = tokio::spawn(async { panic!("worker blew up") });
        let panicked = worker.await.unwrap_err();
        assert_eq!(worker_outcome("orders", Err(panicked)), ShutdownOutcome::WorkerPanicked);

        let cancelled = tokio::spawn(std::future::pending::<()>());
        cancelled.abort();
        let cancelled = cancelled.await.unwrap_err();
        assert_eq!(worker_outcome("orders", Err(cancelled)), ShutdownOutcome::Aborted);
    }
}
