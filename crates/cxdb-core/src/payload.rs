//! Turn payload serialization and content hashing.
//!
//! A payload is a map from small integer tags to msgpack values. Using a
//! [`BTreeMap`] keeps the keys in ascending order, so serializing the same
//! logical payload always produces the same bytes and therefore the same
//! BLAKE3 content hash.

use std::collections::BTreeMap;

use rmpv::Value;

use crate::constants::HASH_LEN;
use crate::errors::{Result, WireError};

/// Integer-tagged msgpack map. Tags serialize in ascending order.
pub type Payload = BTreeMap<u64, Value>;

/// BLAKE3-256 digest of serialized payload bytes.
pub type ContentHash = [u8; HASH_LEN];

/// Convert a payload into a msgpack map value, preserving tag order.
///
/// Used when a payload is nested inside another payload.
#[must_use]
pub fn to_map_value(payload: &Payload) -> Value {
    Value::Map(
        payload
            .iter()
            .map(|(tag, value)| (Value::from(*tag), value.clone()))
            .collect(),
    )
}

/// Serialize a payload to msgpack bytes.
pub fn serialize_payload(payload: &Payload) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &to_map_value(payload))
        .map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Serialize a payload and compute the BLAKE3-256 hash of the exact bytes.
pub fn serialize_and_hash(payload: &Payload) -> Result<(Vec<u8>, ContentHash)> {
    let bytes = serialize_payload(payload)?;
    let hash = content_hash(&bytes);
    Ok((bytes, hash))
}

/// BLAKE3-256 of already-serialized bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    *blake3::hash(bytes).as_bytes()
}

/// Decode msgpack bytes back into an integer-tagged payload.
///
/// Fails if the top-level value is not a map or any key is not a
/// non-negative integer.
pub fn deserialize_payload(bytes: &[u8]) -> Result<Payload> {
    let mut cursor = bytes;
    let value =
        rmpv::decode::read_value(&mut cursor).map_err(|e| WireError::Decode(e.to_string()))?;
    let Value::Map(entries) = value else {
        return Err(WireError::InvalidPayload(
            "top level is not a map".to_string(),
        ));
    };
    let mut payload = Payload::new();
    for (key, value) in entries {
        let tag = key
            .as_u64()
            .ok_or_else(|| WireError::InvalidPayload(format!("non-integer tag: {key}")))?;
        let _ = payload.insert(tag, value);
    }
    Ok(payload)
}

/// Convert a JSON value into the equivalent msgpack value.
///
/// Objects become string-keyed maps, numbers keep their integer or float
/// representation, and `null` becomes msgpack nil.
pub fn json_to_value(json: &serde_json::Value) -> Result<Value> {
    rmpv::ext::to_value(json).map_err(|e| WireError::Encode(e.to_string()))
}

/// Convert a msgpack value back into JSON. Binary values become arrays of
/// byte values and non-string map keys are rendered with `Display`.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            if let Some(u) = i.as_u64() {
                serde_json::Value::from(u)
            } else if let Some(s) = i.as_i64() {
                serde_json::Value::from(s)
            } else {
                serde_json::Value::Null
            }
        }
        Value::F32(f) => serde_json::Value::from(f64::from(*f)),
        Value::F64(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::String(s.as_str().unwrap_or_default().to_string()),
        Value::Binary(b) => serde_json::Value::from(b.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = k.as_str().map_or_else(|| k.to_string(), str::to_string);
                    (key, value_to_json(v))
                })
                .collect(),
        ),
        Value::Ext(_, data) => serde_json::Value::from(data.clone()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample() -> Payload {
        let mut p = Payload::new();
        let _ = p.insert(3, Value::from("three"));
        let _ = p.insert(1, Value::from("one"));
        let _ = p.insert(2, Value::from(42u64));
        p
    }

    #[test]
    fn serialization_is_deterministic() {
        let (a_bytes, a_hash) = serialize_and_hash(&sample()).unwrap();
        let (b_bytes, b_hash) = serialize_and_hash(&sample()).unwrap();
        assert_eq!(a_bytes, b_bytes);
        assert_eq!(a_hash, b_hash);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut reversed = Payload::new();
        let _ = reversed.insert(2, Value::from(42u64));
        let _ = reversed.insert(1, Value::from("one"));
        let _ = reversed.insert(3, Value::from("three"));
        assert_eq!(
            serialize_payload(&sample()).unwrap(),
            serialize_payload(&reversed).unwrap()
        );
    }

    #[test]
    fn keys_written_in_ascending_order() {
        let bytes = serialize_payload(&sample()).unwrap();
        // fixmap(3), key 1 first
        assert_eq!(bytes[0], 0x83);
        assert_eq!(bytes[1], 0x01);
    }

    #[test]
    fn hash_is_blake3_of_bytes() {
        let (bytes, hash) = serialize_and_hash(&sample()).unwrap();
        assert_eq!(hash, *blake3::hash(&bytes).as_bytes());
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn different_payloads_hash_differently() {
        let mut other = sample();
        let _ = other.insert(4, Value::from(true));
        let (_, a) = serialize_and_hash(&sample()).unwrap();
        let (_, b) = serialize_and_hash(&other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn deserialize_recovers_tags() {
        let bytes = serialize_payload(&sample()).unwrap();
        let decoded = deserialize_payload(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn deserialize_rejects_non_map() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &Value::from("nope")).unwrap();
        assert_matches!(
            deserialize_payload(&bytes),
            Err(WireError::InvalidPayload(_))
        );
    }

    #[test]
    fn deserialize_rejects_string_keys() {
        let map = Value::Map(vec![(Value::from("k"), Value::from(1u64))]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &map).unwrap();
        assert_matches!(
            deserialize_payload(&bytes),
            Err(WireError::InvalidPayload(_))
        );
    }

    #[test]
    fn deserialize_rejects_garbage() {
        assert_matches!(deserialize_payload(&[0x92, 0x01]), Err(WireError::Decode(_)));
    }

    #[test]
    fn nested_payload_as_value() {
        let mut outer = Payload::new();
        let _ = outer.insert(13, to_map_value(&sample()));
        let bytes = serialize_payload(&outer).unwrap();
        let decoded = deserialize_payload(&bytes).unwrap();
        let Value::Map(inner) = &decoded[&13] else {
            panic!("expected map");
        };
        assert_eq!(inner.len(), 3);
        assert_eq!(inner[0].0.as_u64(), Some(1));
    }

    #[test]
    fn json_conversion_preserves_shape() {
        let json = json!({"name": "bash", "count": 3, "ratio": 0.5, "tags": ["a"], "none": null});
        let value = json_to_value(&json).unwrap();
        assert_eq!(value_to_json(&value), json);
    }

    #[test]
    fn json_negative_integers() {
        let value = json_to_value(&json!(-7)).unwrap();
        assert_eq!(value.as_i64(), Some(-7));
        assert_eq!(value_to_json(&value), json!(-7));
    }
}
