//! In-process broker used by the demo binary and tests.

use super::{BrokerAck, BrokerClient};
use crate::record::OutboundRecord;
use crate::BrokerError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct BrokerState {
    reachable: bool,
    reject_reason: Option<String>,
    transient_failures: u32,
    send_delay: Duration,
    records: Vec<OutboundRecord>,
    next_offset: u64,
    send_attempts: usize,
    probes: usize,
    closes: usize,
    closed: bool,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            reject_reason: None,
            transient_failures: 0,
            send_delay: Duration::ZERO,
            records: Vec::new(),
            next_offset: 0,
            send_attempts: 0,
            probes: 0,
            closes: 0,
            closed: false,
        }
    }
}

/// A broker that keeps accepted records in memory.
///
/// Reachability, rejections, transient failures and send latency can be
/// switched at runtime. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that starts out unreachable.
    pub fn unreachable() -> Self {
        let broker = Self::default();
        broker.set_reachable(false);
        broker
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Reject every record with `reason` until cleared with `None`.
    pub fn reject_with(&self, reason: Option<&str>) {
        self.state().reject_reason = reason.map(str::to_string);
    }

    /// Fail the next `count` sends as unreachable, then recover.
    pub fn fail_next(&self, count: u32) {
        self.state().transient_failures = count;
    }

    /// Delay every acknowledged send by `delay`.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state().send_delay = delay;
    }

    /// Records accepted so far, in acceptance order.
    pub fn records(&self) -> Vec<OutboundRecord> {
        self.state().records.clone()
    }

    /// Keys of the accepted records, in acceptance order.
    pub fn keys(&self) -> Vec<String> {
        self.state().records.iter().map(|r| r.key.clone()).collect()
    }

    /// Number of `send` and `submit` calls, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.state().send_attempts
    }

    pub fn probe_count(&self) -> usize {
        self.state().probes
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn accept(&self, record: OutboundRecord) -> Result<BrokerAck, BrokerError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(BrokerError::Unreachable("in-memory broker is down".to_string()));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(BrokerError::Unreachable("transient failure".to_string()));
        }
        if let Some(reason) = &state.reject_reason {
            return Err(BrokerError::Rejected(reason.clone()));
        }

        let offset = state.next_offset;
        state.next_offset += 1;
        debug!(topic = %record.topic, key = %record.key, offset, "In-memory broker accepted record");
        state.records.push(record);
        Ok(BrokerAck { offset })
    }

    /// Count the attempt and fail fast once closed.
    fn begin_send(&self) -> Result<Duration, BrokerError> {
        let mut state = self.state();
        state.send_attempts += 1;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        Ok(state.send_delay)
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn send(&self, record: &OutboundRecord) -> Result<BrokerAck, BrokerError> {
        let delay = self.begin_send()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.accept(record.clone())
    }

    fn submit(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        self.begin_send()?;
        self.accept(record).map(|_| ())
    }

    async fn probe(&self) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.probes += 1;
        if state.closed {
            Err(BrokerError::Closed)
        } else if state.reachable {
            Ok(())
        } else {
            Err(BrokerError::Unreachable("in-memory broker is down".to_string()))
        }
    }

    fn close(&self) {
        let mut state = self.state();
        state.closes += 1;
        state.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str) -> OutboundRecord {
        OutboundRecord {
            topic: "orders".into(),
            key: key.into(),
            value: json!({ "n": 1 }),
        }
    }

    #[tokio::test]
    async fn send_assigns_increasing_offsets() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.send(&record("a")).await.unwrap().offset, 0);
        assert_eq!(broker.send(&record("b")).await.unwrap().offset, 1);
        assert_eq!(broker.keys(), vec!["a", "b"]);
        assert_eq!(broker.send_attempts(), 2);
    }

    #[tokio::test]
    async fn unreachable_broker_refuses_sends_and_probes() {
        let broker = InMemoryBroker::unreachable();
        assert!(matches!(
            broker.send(&record("a")).await,
            Err(BrokerError::Unreachable(_))
        ));
        assert!(broker.probe().await.is_err());

        broker.set_reachable(true);
        assert!(broker.probe().await.is_ok());
        assert_eq!(broker.probe_count(), 2);
    }

    #[tokio::test]
    async fn transient_failures_recover() {
        let broker = InMemoryBroker::new();
        broker.fail_next(2);
        assert!(broker.send(&record("a")).await.is_err());
        assert!(broker.send(&record("a")).await.is_err());
        assert!(broker.send(&record("a")).await.is_ok());
        assert_eq!(broker.send_attempts(), 3);
        assert_eq!(broker.records().len(), 1);
    }

    #[test]
    fn submit_reports_rejection() {
        let broker = InMemoryBroker::new();
        broker.reject_with(Some("record too large"));
        assert_eq!(
            broker.submit(record("a")),
            Err(BrokerError::Rejected("record too large".into()))
        );

        broker.reject_with(None);
        assert_eq!(broker.submit(record("a")), Ok(()));
    }

    #[tokio::test]
    async fn closed_broker_refuses_new_work() {
        let broker = InMemoryBroker::new();
        broker.close();
        broker.close();
        assert_eq!(broker.close_count(), 2);
        assert!(broker.is_closed());
        assert_eq!(broker.send(&record("a")).await, Err(BrokerError::Closed));
        assert_eq!(broker.probe().await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn in_flight_send_completes_after_close() {
        let broker = InMemoryBroker::new();
        broker.set_send_delay(Duration::from_millis(50));

        let sender = broker.clone();
        let in_flight = tokio::spawn(async move { sender.send(&record("a")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.close();

        assert!(in_flight.await.unwrap().is_ok());
        assert_eq!(broker.keys(), vec!["a"]);
    }
}
