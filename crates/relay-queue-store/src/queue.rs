//! The per-topic durable queue contract.

use crate::QueueResult;

/// An item stored in a durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Position assigned at enqueue time; monotonic and unique per topic.
    pub index: u64,
    /// Opaque serialized record.
    pub payload: Vec<u8>,
}

/// Crash-durable FIFO queue of opaque payloads for a single topic.
///
/// Items are consumed in the order they were enqueued. `is_empty` and `len`
/// are best-effort snapshots: a concurrent enqueue may land right after they
/// return, and callers are expected to poll again.
pub trait DurableQueue: Send + Sync {
    /// Topic this queue belongs to.
    fn topic(&self) -> &str;

    /// Persist a payload at the tail and return its index.
    ///
    /// Returns only after the write has been committed.
    fn enqueue(&self, payload: &[u8]) -> QueueResult<u64>;

    /// Whether the queue currently holds no items.
    fn is_empty(&self) -> QueueResult<bool>;

    /// Number of items currently held.
    fn len(&self) -> QueueResult<u64>;

    /// Remove and return the oldest item, or `None` if there is none.
    fn consume(&self) -> QueueResult<Option<QueueItem>>;
}
