//! Broker client abstraction.
//!
//! The pipeline never talks to a network protocol directly. Everything it
//! needs from the broker goes through [`BrokerClient`]; a Kafka-style
//! producer, an HTTP bridge or the bundled [`InMemoryBroker`] all plug in
//! here.

mod in_memory;

pub use in_memory::InMemoryBroker;

use crate::record::OutboundRecord;
use crate::BrokerError;
use async_trait::async_trait;

/// Acknowledgement returned by the broker for an accepted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerAck {
    /// Position assigned by the broker within the topic.
    pub offset: u64,
}

/// Client for the downstream message broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Send a record and wait for the broker to acknowledge it.
    async fn send(&self, record: &OutboundRecord) -> Result<BrokerAck, BrokerError>;

    /// Hand a record to the client without waiting for acknowledgement.
    ///
    /// Only errors detectable at submission time are reported.
    fn submit(&self, record: OutboundRecord) -> Result<(), BrokerError>;

    /// Lightweight metadata request used to decide reachability.
    async fn probe(&self) -> Result<(), BrokerError>;

    /// Release client resources. In-flight sends may still complete.
    fn close(&self);
}
