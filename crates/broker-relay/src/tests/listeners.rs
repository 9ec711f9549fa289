//! Listener notification order and isolation.

use super::harness::{order, test_config, wait_until, Event, Order, RecordingListener, WAIT};
use crate::{DeliveryError, DeliveryListener, InMemoryBroker, Pipeline};
use relay_queue_store::QueueStore;
use std::sync::{Arc, Mutex};

/// Appends `<tag>:<event>` to a journal shared between listeners.
struct Journal {
    tag: &'static str,
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    fn write(&self, event: &str) {
        self.entries.lock().unwrap().push(format!("{}:{}", self.tag, event));
    }
}

impl DeliveryListener for Journal {
    fn before_send(&self, index: u64) {
        self.write(&format!("before({index})"));
    }

    fn after_send(&self, index: u64) {
        self.write(&format!("after({index})"));
    }

    fn on_send_success(&self, _topic: &str, _offset: Option<u64>) {
        self.write("success");
    }

    fn on_send_fail(&self, _topic: &str, _message: &str, _cause: &DeliveryError) {
        self.write("fail");
    }
}

struct PanicsOnEverything;

impl DeliveryListener for PanicsOnEverything {
    fn before_send(&self, _index: u64) {
        panic!("before_send listener failure");
    }

    fn after_send(&self, _index: u64) {
        panic!("after_send listener failure");
    }

    fn on_send_success(&self, _topic: &str, _offset: Option<u64>) {
        panic!("on_send_success listener failure");
    }
}

fn build(broker: &InMemoryBroker, listeners: Vec<Arc<dyn DeliveryListener>>) -> Pipeline<Order> {
    let builder = Pipeline::builder()
        .topic("orders")
        .queue_store(Arc::new(QueueStore::open_in_memory().unwrap()))
        .broker(Arc::new(broker.clone()))
        .config(test_config());
    listeners
        .into_iter()
        .fold(builder, |builder, listener| builder.listener(listener))
        .build()
        .unwrap()
}

#[tokio::test]
async fn every_event_follows_registration_order() {
    let broker = InMemoryBroker::new();
    broker.reject_with(Some("nope"));
    let entries = Arc::new(Mutex::new(Vec::new()));
    let listeners: Vec<Arc<dyn DeliveryListener>> = ["first", "second", "third"]
        .into_iter()
        .map(|tag| {
            Arc::new(Journal {
                tag,
                entries: entries.clone(),
            }) as Arc<dyn DeliveryListener>
        })
        .collect();
    let pipeline = build(&broker, listeners);

    pipeline.enqueue("rejected", order(1)).unwrap();
    assert!(wait_until(WAIT, || entries.lock().unwrap().len() == 9).await);

    broker.reject_with(None);
    pipeline.enqueue("accepted", order(2)).unwrap();
    assert!(wait_until(WAIT, || entries.lock().unwrap().len() == 18).await);

    let expected: Vec<String> = [
        "before(0)", "fail", "after(0)", "before(1)", "success", "after(1)",
    ]
    .iter()
    .flat_map(|event| ["first", "second", "third"].map(|tag| format!("{tag}:{event}")))
    .collect();
    assert_eq!(*entries.lock().unwrap(), expected);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn panicking_listener_is_isolated() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(RecordingListener::new());
    let panicking: Arc<dyn DeliveryListener> = Arc::new(PanicsOnEverything);
    let listeners = vec![panicking, recorder.clone() as Arc<dyn DeliveryListener>];
    let pipeline = build(&broker, listeners);

    pipeline.enqueue("k1", order(1)).unwrap();
    pipeline.enqueue("k2", order(2)).unwrap();
    assert!(wait_until(WAIT, || recorder.finished() >= 2).await);

    assert_eq!(broker.keys(), vec!["k1", "k2"]);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Before(0),
            Event::success("orders", Some(0)),
            Event::After(0),
            Event::Before(1),
            Event::success("orders", Some(1)),
            Event::After(1),
        ]
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn failure_message_names_the_record() {
    let broker = InMemoryBroker::new();
    broker.reject_with(Some("bad key"));
    let recorder = Arc::new(RecordingListener::new());
    let pipeline = build(&broker, vec![recorder.clone() as Arc<dyn DeliveryListener>]);

    pipeline.enqueue("customer-42", order(42)).unwrap();
    assert!(wait_until(WAIT, || recorder.finished() >= 1).await);

    let failure = recorder
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Fail { topic, message, cause } => Some((topic, message, cause)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0, "orders");
    assert_eq!(failure.1, "record #0 (key \"customer-42\")");
    assert_eq!(failure.2, "Broker error: Broker rejected record: bad key");

    pipeline.shutdown().await;
}

/// Without explicit listeners the pipeline falls back to the logging listener
/// and still delivers.
#[tokio::test]
async fn default_listener_when_none_given() {
    let broker = InMemoryBroker::new();
    let pipeline = build(&broker, Vec::new());

    pipeline.enqueue("k1", order(1)).unwrap();
    assert!(wait_until(WAIT, || broker.records().len() == 1).await);

    pipeline.shutdown().await;
}
