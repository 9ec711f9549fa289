//! Delivery lifecycle listeners.

use crate::DeliveryError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Observer of delivery lifecycle events.
///
/// Callbacks run on the delivery worker and should return quickly. A
/// panicking listener is logged and skipped; it never stops the worker or
/// the listeners registered after it.
pub trait DeliveryListener: Send + Sync {
    /// Called after an item is consumed, before anything is sent.
    fn before_send(&self, _index: u64) {}

    /// Called once the attempt for an item has finished, whatever the outcome.
    fn after_send(&self, _index: u64) {}

    /// The broker accepted the record. `offset` is `None` when the strategy
    /// does not wait for an acknowledgement.
    fn on_send_success(&self, _topic: &str, _offset: Option<u64>) {}

    /// The record could not be delivered.
    fn on_send_fail(&self, _topic: &str, _message: &str, _cause: &DeliveryError) {}
}

/// Default listener: writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl DeliveryListener for LoggingListener {
    fn before_send(&self, index: u64) {
        debug!(index, "Sending record");
    }

    fn after_send(&self, index: u64) {
        debug!(index, "Send attempt finished");
    }

    fn on_send_success(&self, topic: &str, offset: Option<u64>) {
        debug!(topic = %topic, offset = ?offset, "Record delivered");
    }

    fn on_send_fail(&self, topic: &str, message: &str, cause: &DeliveryError) {
        error!(topic = %topic, record = %message, error = %cause, "Record delivery failed");
    }
}

/// Ordered, append-only set of listeners. Registration order is
/// notification order.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn DeliveryListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn DeliveryListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn before_send(&self, index: u64) {
        self.notify("before_send", |l| l.before_send(index));
    }

    pub fn after_send(&self, index: u64) {
        self.notify("after_send", |l| l.after_send(index));
    }

    pub fn on_send_success(&self, topic: &str, offset: Option<u64>) {
        self.notify("on_send_success", |l| l.on_send_success(topic, offset));
    }

    pub fn on_send_fail(&self, topic: &str, message: &str, cause: &DeliveryError) {
        self.notify("on_send_fail", |l| l.on_send_fail(topic, message, cause));
    }

    fn notify(&self, event: &'static str, f: impl Fn(&dyn DeliveryListener)) {
        for (position, listener) in self.listeners.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if let Err(payload) = outcome {
                error!(
                    event,
                    position,
                    panic = %panic_message(payload.as_ref()),
                    "Delivery listener panicked"
                );
            }
        }
    }
}

impl FromIterator<Arc<dyn DeliveryListener>> for ListenerSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn DeliveryListener>>>(iter: I) -> Self {
        Self {
            listeners: iter.into_iter().collect(),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
