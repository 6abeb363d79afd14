//! DAG-CBOR helpers.
//!
//! Records inside firehose blocks are DAG-CBOR. This module converts decoded
//! [`ciborium::Value`] trees into the AT Protocol JSON data model so the rest
//! of the pipeline can work with plain `serde_json::Value`s:
//!
//! - CID links (CBOR tag 42) become `{"$link": "<cid>"}`
//! - Byte strings become `{"$bytes": "<base64, no padding>"}`
//!
//! It also provides small typed accessors over CBOR maps, used by the frame
//! decoder.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ciborium::Value;
use cid::Cid;
use serde_json::{Map, Number, Value as JsonValue};

/// CBOR tag used by DAG-CBOR for CID links.
pub const CID_TAG: u64 = 42;

/// Decode exactly one CBOR item from the front of `reader`, advancing it.
pub fn read_value(reader: &mut &[u8]) -> Result<Value> {
    Ok(ciborium::de::from_reader(reader)?)
}

/// Decode a buffer that must contain exactly one CBOR item.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut reader = bytes;
    let value = read_value(&mut reader)?;
    if !reader.is_empty() {
        return Err(Error::Cbor(format!(
            "{} trailing bytes after CBOR item",
            reader.len()
        )));
    }
    Ok(value)
}

/// Encode a serializable value as CBOR.
pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Parse a tag-42 payload into a CID.
///
/// DAG-CBOR prefixes the binary CID with a `0x00` multibase identity byte.
pub fn cid_from_link(payload: &Value) -> Result<Cid> {
    let bytes = payload
        .as_bytes()
        .ok_or_else(|| Error::Cbor("CID link payload is not a byte string".to_string()))?;
    match bytes.split_first() {
        Some((&0x00, cid_bytes)) => Ok(Cid::try_from(cid_bytes)?),
        _ => Err(Error::Cbor(
            "CID link is missing the identity multibase prefix".to_string(),
        )),
    }
}

/// Wrap a CID as a tag-42 CBOR value.
pub fn link_value(cid: &Cid) -> Value {
    let mut payload = vec![0x00];
    payload.extend_from_slice(&cid.to_bytes());
    Value::Tag(CID_TAG, Box::new(Value::Bytes(payload)))
}

/// Convert a CBOR value into the AT Protocol JSON data model.
pub fn to_json(value: &Value) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(int) => {
            let n = i128::from(*int);
            if let Ok(n) = i64::try_from(n) {
                JsonValue::Number(n.into())
            } else if let Ok(n) = u64::try_from(n) {
                JsonValue::Number(n.into())
            } else {
                JsonValue::String(n.to_string())
            }
        }
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => bytes_object(b),
        Value::Array(items) => {
            JsonValue::Array(items.iter().map(to_json).collect::<Result<Vec<_>>>()?)
        }
        Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = k
                    .as_text()
                    .ok_or_else(|| Error::Cbor("map key is not a text string".to_string()))?;
                map.insert(key.to_string(), to_json(v)?);
            }
            JsonValue::Object(map)
        }
        Value::Tag(CID_TAG, payload) => {
            let cid = cid_from_link(payload)?;
            let mut map = Map::with_capacity(1);
            map.insert("$link".to_string(), JsonValue::String(cid.to_string()));
            JsonValue::Object(map)
        }
        Value::Tag(tag, _) => {
            return Err(Error::Cbor(format!("unsupported CBOR tag {tag}")));
        }
        other => return Err(Error::Cbor(format!("unsupported CBOR value {other:?}"))),
    })
}

/// Represent raw bytes as `{"$bytes": "..."}`.
pub fn bytes_object(bytes: &[u8]) -> JsonValue {
    let mut map = Map::with_capacity(1);
    map.insert(
        "$bytes".to_string(),
        JsonValue::String(STANDARD_NO_PAD.encode(bytes)),
    );
    JsonValue::Object(map)
}

// =============================================================================
// Map accessors
// =============================================================================

/// Borrow the entries of a CBOR map.
pub fn as_map<'a>(value: &'a Value, what: &str) -> Result<&'a [(Value, Value)]> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Cbor(format!("{what} is not a map")))
}

/// Look up a text key in a CBOR map.
pub fn get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Look up a text field, treating `null` as absent.
pub fn get_text<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a str> {
    get(map, key).and_then(Value::as_text)
}

/// Look up an integer field.
pub fn get_int(map: &[(Value, Value)], key: &str) -> Option<i64> {
    get(map, key)
        .and_then(Value::as_integer)
        .and_then(|int| i64::try_from(i128::from(int)).ok())
}

/// Look up a boolean field.
pub fn get_bool(map: &[(Value, Value)], key: &str) -> Option<bool> {
    get(map, key).and_then(Value::as_bool)
}
