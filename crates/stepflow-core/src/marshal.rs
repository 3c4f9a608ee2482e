//! Payload marshalling.
//!
//! Workflow inputs/outputs and step results are stored as opaque bytes. A
//! [`Marshaller`] turns a `serde_json::Value` tree into bytes and back; the
//! typed helpers [`encode`] and [`decode`] bridge any serde type through that
//! tree so the marshaller itself stays object-safe and can be shared as
//! `Arc<dyn Marshaller>`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors from encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Byte codec for payload trees.
///
/// Implementations must be deterministic enough that
/// `decode(encode(v)) == v` for every value they accept.
pub trait Marshaller: Send + Sync {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>, MarshalError>;

    fn decode_value(&self, bytes: &[u8]) -> Result<Value, MarshalError>;
}

/// Default codec: compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>, MarshalError> {
        serde_json::to_vec(value).map_err(|e| MarshalError::Encode(e.to_string()))
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        serde_json::from_slice(bytes).map_err(|e| MarshalError::Decode(e.to_string()))
    }
}

/// Marshal a typed value.
pub fn encode<T: Serialize + ?Sized>(
    marshaller: &dyn Marshaller,
    value: &T,
) -> Result<Vec<u8>, MarshalError> {
    let tree = serde_json::to_value(value).map_err(|e| MarshalError::Encode(e.to_string()))?;
    marshaller.encode_value(&tree)
}

/// Unmarshal bytes into a typed value.
pub fn decode<T: DeserializeOwned>(
    marshaller: &dyn Marshaller,
    bytes: &[u8],
) -> Result<T, MarshalError> {
    let tree = marshaller.decode_value(bytes)?;
    serde_json::from_value(tree).map_err(|e| MarshalError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        id: u64,
        customer: String,
        lines: Vec<(String, i64)>,
        note: Option<String>,
    }

    #[test]
    fn struct_payload_survives_marshalling() {
        let m = JsonMarshaller;
        let invoice = Invoice {
            id: 42,
            customer: "acme".to_string(),
            lines: vec![("widget".to_string(), 1999), ("gadget".to_string(), -500)],
            note: None,
        };
        let bytes = encode(&m, &invoice).unwrap();
        let back: Invoice = decode(&m, &bytes).unwrap();
        assert_eq!(back, invoice);
    }

    #[test]
    fn scalar_and_unit_payloads() {
        let m = JsonMarshaller;
        assert_eq!(decode::<u32>(&m, &encode(&m, &7u32).unwrap()).unwrap(), 7);
        assert_eq!(decode::<String>(&m, &encode(&m, "hi").unwrap()).unwrap(), "hi");
        decode::<()>(&m, &encode(&m, &()).unwrap()).unwrap();

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![1.5f64, 2.0]);
        let back: BTreeMap<String, Vec<f64>> = decode(&m, &encode(&m, &map).unwrap()).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn decode_into_wrong_type_fails() {
        let m = JsonMarshaller;
        let bytes = encode(&m, &"not a number").unwrap();
        let err = decode::<u64>(&m, &bytes).unwrap_err();
        assert!(matches!(err, MarshalError::Decode(_)));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode::<Value>(&JsonMarshaller, b"\xff{").unwrap_err();
        assert!(err.to_string().starts_with("decode error"));
    }
}
