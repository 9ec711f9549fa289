//! Test harness for pipeline scenarios.
//!
//! Provides:
//! - RecordingListener: captures every lifecycle event in order
//! - PanickingBroker: broker that panics on a chosen key
//! - Fixture: a running pipeline wired to an `InMemoryBroker`
//! - wait_until: polls a condition with a deadline

use crate::broker::{BrokerAck, BrokerClient};
use crate::{
    BrokerError, DeliveryError, DeliveryListener, DeliveryStrategyKind, InMemoryBroker, OutboundRecord,
    Pipeline,
};
use async_trait::async_trait;
use relay_config_and_utils::{DeliveryLoopConfig, HealthConfig, RelayConfig, ReliableConfig};
use relay_queue_store::QueueStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A lifecycle event seen by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Before(u64),
    After(u64),
    Success { topic: String, offset: Option<u64> },
    Fail { topic: String, message: String, cause: String },
}

impl Event {
    pub fn success(topic: &str, offset: Option<u64>) -> Self {
        Event::Success {
            topic: topic.to_string(),
            offset,
        }
    }
}

/// Listener that records every event.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Causes of every `on_send_fail`, rendered as text.
    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Fail { cause, .. } => Some(cause),
                _ => None,
            })
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Success { .. }))
            .count()
    }

    /// Number of finished attempts (`after_send` calls).
    pub fn finished(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::After(_)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl DeliveryListener for RecordingListener {
    fn before_send(&self, index: u64) {
        self.push(Event::Before(index));
    }

    fn after_send(&self, index: u64) {
        self.push(Event::After(index));
    }

    fn on_send_success(&self, topic: &str, offset: Option<u64>) {
        self.push(Event::success(topic, offset));
    }

    fn on_send_fail(&self, topic: &str, message: &str, cause: &DeliveryError) {
        self.push(Event::Fail {
            topic: topic.to_string(),
            message: message.to_string(),
            cause: cause.to_string(),
        });
    }
}

/// Broker that panics when asked to send `poison_key`.
pub struct PanickingBroker {
    pub inner: InMemoryBroker,
    pub poison_key: &'static str,
}

#[async_trait]
impl BrokerClient for PanickingBroker {
    async fn send(&self, record: &OutboundRecord) -> Result<BrokerAck, BrokerError> {
        if record.key == self.poison_key {
            panic!("broker exploded on {}", record.key);
        }
        self.inner.send(record).await
    }

    fn submit(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        if record.key == self.poison_key {
            panic!("broker exploded on {}", record.key);
        }
        self.inner.submit(record)
    }

    async fn probe(&self) -> Result<(), BrokerError> {
        self.inner.probe().await
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// Value type used by the scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u32,
    pub amount_cents: u64,
}

pub fn order(id: u32) -> Order {
    Order {
        id,
        amount_cents: u64::from(id) * 100,
    }
}

/// Tunables small enough for tests to run in milliseconds.
pub fn test_config() -> RelayConfig {
    RelayConfig {
        delivery: DeliveryLoopConfig {
            idle_poll_interval_ms: 20,
            unreachable_backoff_ms: 10,
            shutdown_timeout_ms: 800,
        },
        reliable: ReliableConfig {
            max_retries: 3,
            initial_retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            ack_timeout_ms: 2_000,
            requeue_exhausted: false,
        },
        health: HealthConfig {
            probe_interval_ms: 10,
            probe_timeout_ms: 100,
        },
        ..RelayConfig::default()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(5);

/// A running pipeline for topic "orders" and the pieces around it.
pub struct Fixture {
    pub broker: InMemoryBroker,
    pub store: Arc<QueueStore>,
    pub recorder: Arc<RecordingListener>,
    pub pipeline: Pipeline<Order>,
}

impl Fixture {
    pub fn start(kind: DeliveryStrategyKind) -> Self {
        Self::with(kind, InMemoryBroker::new(), test_config())
    }

    pub fn with(kind: DeliveryStrategyKind, broker: InMemoryBroker, config: RelayConfig) -> Self {
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        Self::on_store(kind, broker, config, store)
    }

    pub fn on_store(
        kind: DeliveryStrategyKind,
        broker: InMemoryBroker,
        config: RelayConfig,
        store: Arc<QueueStore>,
    ) -> Self {
        let recorder = Arc::new(RecordingListener::new());
        let pipeline = Pipeline::builder()
            .topic("orders")
            .queue_store(store.clone())
            .broker(Arc::new(broker.clone()))
            .listener(recorder.clone())
            .delivery_strategy(kind)
            .config(config)
            .build()
            .unwrap();

        Self {
            broker,
            store,
            recorder,
            pipeline,
        }
    }

    /// Wait until `count` attempts have finished.
    pub async fn wait_for_finished(&self, count: usize) -> bool {
        wait_until(WAIT, || self.recorder.finished() >= count).await
    }
}
