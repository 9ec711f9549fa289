//! Record serializers.
//!
//! A serializer turns a `KvRecord<V>` into the opaque payload stored in the
//! durable queue and back. Serializers are stateless and shared between the
//! producer side (`enqueue`) and the delivery worker.

use crate::record::KvRecord;
use crate::SerializeError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts records to and from queue payloads.
pub trait RecordSerializer<V>: Send + Sync {
    fn serialize(&self, record: &KvRecord<V>) -> Result<Vec<u8>, SerializeError>;
    fn deserialize(&self, payload: &[u8]) -> Result<KvRecord<V>, SerializeError>;
}

/// Compact binary codec (bitcode). The default.
///
/// The codec is not self-describing, so values that rely on
/// `deserialize_any` (such as `serde_json::Value`) must use
/// [`JsonSerializer`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl<V> RecordSerializer<V> for BinarySerializer
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, record: &KvRecord<V>) -> Result<Vec<u8>, SerializeError> {
        Ok(bitcode::serialize(record)?)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<KvRecord<V>, SerializeError> {
        Ok(bitcode::deserialize(payload)?)
    }
}

/// JSON payloads. Larger than the binary codec but readable in the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<V> RecordSerializer<V> for JsonSerializer
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, record: &KvRecord<V>) -> Result<Vec<u8>, SerializeError> {
        Ok(serde_json::to_vec(record)?)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<KvRecord<V>, SerializeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        celsius: f64,
        tags: Vec<String>,
    }

    fn sample() -> KvRecord<Reading> {
        KvRecord::new(
            "sensor-1",
            Reading {
                sensor: "greenhouse".into(),
                celsius: 21.5,
                tags: vec!["north".into()],
            },
        )
    }

    #[test]
    fn binary_serializer_restores_record() {
        let serializer = BinarySerializer;
        let bytes = serializer.serialize(&sample()).unwrap();
        let restored: KvRecord<Reading> = serializer.deserialize(&bytes).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn json_payload_is_readable() {
        let bytes = JsonSerializer.serialize(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"key\":\"sensor-1\""));
        assert!(text.contains("greenhouse"));
    }

    #[test]
    fn json_serializer_handles_dynamic_values() {
        let record = KvRecord::new("k", serde_json::json!({ "nested": [1, 2, 3] }));
        let bytes = JsonSerializer.serialize(&record).unwrap();
        let restored: KvRecord<serde_json::Value> = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let binary: Result<KvRecord<Reading>, _> = BinarySerializer.deserialize(&[]);
        assert!(matches!(binary, Err(SerializeError::Binary(_))));

        let json: Result<KvRecord<Reading>, _> = JsonSerializer.deserialize(b"{ nope");
        assert!(matches!(json, Err(SerializeError::Json(_))));
    }
}
