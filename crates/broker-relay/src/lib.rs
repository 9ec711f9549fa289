//! Broker relay: durable, health-gated delivery of key/value records.
//!
//! Producers enqueue records into a crash-durable local queue and return
//! immediately. A single background worker drains the queue, waits while the
//! broker is unreachable, and hands each record to a delivery strategy.
//!
//! # Core Invariants
//!
//! 1. **Enqueue Never Touches the Broker**: `Pipeline::enqueue` is a local
//!    durable write only
//! 2. **Health-Gated**: nothing is consumed from the queue while the broker is
//!    known to be unreachable
//! 3. **One In-Flight**: items are delivered one at a time, in queue order
//! 4. **Listeners Observe Everything**: every consumed item produces
//!    `before_send`, exactly one outcome per attempt, and `after_send`
//!
//! # Architecture
//!
//! ```text
//! enqueue -> Serializer -> DurableQueue -> DeliveryWorker -> DeliveryStrategy -> Broker
//!                                             ^                  |
//!                                      HealthMonitor         Listeners
//! ```

pub mod broker;
pub mod error;
pub mod health;
pub mod listener;
pub mod pipeline;
pub mod record;
pub mod serializer;
pub mod strategy;
mod worker;

#[cfg(test)]
mod tests;

pub use broker::{BrokerAck, BrokerClient, InMemoryBroker};
pub use error::{BrokerError, DeliveryError, EnqueueError, PipelineError, RelayResult, SerializeError};
pub use health::HealthMonitor;
pub use listener::{DeliveryListener, ListenerSet, LoggingListener};
pub use pipeline::{Pipeline, PipelineBuilder, ShutdownOutcome};
pub use record::{DeliveryAttempt, KvRecord, OutboundRecord};
pub use serializer::{BinarySerializer, JsonSerializer, RecordSerializer};
pub use strategy::{DeliveryStrategy, DeliveryStrategyKind};
