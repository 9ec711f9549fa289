//! Record types flowing through the pipeline.

use serde::{Deserialize, Serialize};

/// A key/value record as produced by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvRecord<V> {
    pub key: String,
    pub value: V,
}

impl<V> KvRecord<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A record in the broker's wire form, bound to a destination topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl OutboundRecord {
    /// Map a decoded record onto the JSON document model used on the wire.
    pub fn from_record<V: Serialize>(
        topic: &str,
        record: KvRecord<V>,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(&record.value)?;
        Ok(Self {
            topic: topic.to_string(),
            key: record.key,
            value,
        })
    }
}

/// One consumed queue item, ready for a delivery strategy.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Queue index the item was consumed from.
    pub index: u64,
    /// The original serialized payload, kept for requeueing.
    pub payload: Vec<u8>,
    pub record: OutboundRecord,
}

impl DeliveryAttempt {
    /// Short human-readable description used in failure reports.
    pub fn describe(&self) -> String {
        describe_item(self.index, Some(&self.record.key))
    }
}

pub(crate) fn describe_item(index: u64, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("record #{index} (key {key:?})"),
        None => format!("record #{index}"),
    }
}
