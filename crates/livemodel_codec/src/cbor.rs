//! CBOR handling for structured field values.
//!
//! Fields of type [`FieldType::Other`](crate::FieldType::Other) holding
//! arrays or maps are stored as CBOR blobs. This module also bridges serde
//! types to [`Value`] so applications can keep their own structs in such
//! fields.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as CborValue};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the writer fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&to_cbor_value(value), &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or use an integer
/// outside the `i64` range.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let decoded: CborValue = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_cbor_value(decoded)
}

fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Integer(n) => CborValue::Integer(Integer::from(*n)),
        Value::Real(n) => CborValue::Float(*n),
        Value::Text(s) => CborValue::Text(s.clone()),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(pairs) => CborValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_cbor_value(k), to_cbor_value(v)))
                .collect(),
        ),
    }
}

fn from_cbor_value(value: CborValue) -> CodecResult<Value> {
    Ok(match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(n) => {
            let wide = i128::from(n);
            let narrow = i64::try_from(wide)
                .map_err(|_| CodecError::decoding_failed(format!("integer {wide} out of range")))?;
            Value::Integer(narrow)
        }
        CborValue::Float(n) => Value::Real(n),
        CborValue::Text(s) => Value::Text(s),
        CborValue::Bytes(b) => Value::Bytes(b),
        CborValue::Tag(_, inner) => from_cbor_value(*inner)?,
        CborValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor_value)
                .collect::<CodecResult<_>>()?,
        ),
        CborValue::Map(pairs) => Value::map(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((from_cbor_value(k)?, from_cbor_value(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
        other => {
            return Err(CodecError::decoding_failed(format!(
                "unsupported CBOR item: {other:?}"
            )))
        }
    })
}

impl Value {
    /// Converts any serde-serializable value into a [`Value`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> CodecResult<Self> {
        let cbor = CborValue::serialized(value)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        from_cbor_value(cbor)
    }

    /// Converts this value into a serde-deserializable type.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the shape `T` expects.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> CodecResult<T> {
        to_cbor_value(self)
            .deserialized()
            .map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
