//! Error types for the relay pipeline.

use relay_queue_store::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a broker client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// The broker refused the record
    #[error("Broker rejected record: {0}")]
    Rejected(String),

    /// No acknowledgement within the allowed time
    #[error("Broker did not respond within {0:?}")]
    Timeout(Duration),

    /// The client has been closed
    #[error("Broker client is closed")]
    Closed,
}

impl BrokerError {
    /// Whether sending the same record again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unreachable(_) | BrokerError::Timeout(_))
    }
}

/// Record encoding error.
#[derive(Error, Debug)]
pub enum SerializeError {
    /// Binary codec failure
    #[error("Binary codec error: {0}")]
    Binary(#[from] bitcode::Error),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced synchronously by `Pipeline::enqueue`.
#[derive(Error, Debug)]
pub enum EnqueueError {
    /// The record could not be serialized
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] SerializeError),

    /// The durable queue rejected the write
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Failure of a single delivery attempt.
///
/// These never leave the delivery loop; they are handed to listeners via
/// `on_send_fail` and logged.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Broker error that is not worth retrying
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Every allowed attempt failed
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: BrokerError },

    /// The queued payload could not be decoded
    #[error("Failed to decode queued record: {0}")]
    Decode(#[source] SerializeError),

    /// The record value could not be mapped to the broker wire form
    #[error("Failed to map record value to wire form: {0}")]
    WireMapping(#[source] serde_json::Error),

    /// The payload could not be put back on the queue after exhaustion
    #[error("Failed to requeue record: {0}")]
    Requeue(#[from] QueueError),

    /// The delivery strategy panicked
    #[error("Delivery panicked: {0}")]
    Panicked(String),
}

/// Errors raised while building a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Topic was not set or is blank
    #[error("Pipeline topic must be a non-empty string")]
    MissingTopic,

    /// No queue store was supplied
    #[error("Pipeline requires a queue store")]
    MissingQueueStore,

    /// No broker client was supplied
    #[error("Pipeline requires a broker client")]
    MissingBroker,

    /// Pipelines spawn background tasks and must be built inside a tokio runtime
    #[error("Pipeline must be built inside a tokio runtime")]
    NoRuntime,

    /// The topic queue could not be opened
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Result type for pipeline construction.
pub type RelayResult<T> = Result<T, PipelineError>;
