//! Conversion between stored column values and typed field values.

use crate::cbor::{from_cbor, to_cbor};
use crate::error::{CodecError, CodecResult};
use crate::field::{FieldInfo, FieldType};
use crate::value::Value;

/// Converts between raw column values and typed field values.
///
/// Raw values are what the SQL engine stores: `Null`, `Integer`, `Real`,
/// `Text` or `Bytes`. Typed values are what application code reads from and
/// writes to instances.
pub trait RowCodec: Send + Sync {
    /// Converts a stored column value into the field's typed value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedType`] if the stored value cannot be
    /// represented as the field's type.
    fn decode(&self, raw: Value, field: &FieldInfo) -> CodecResult<Value>;

    /// Converts a typed field value into a value the engine can store.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedType`] if the value cannot be stored
    /// in the field's column.
    fn encode(&self, value: &Value, field: &FieldInfo) -> CodecResult<Value>;
}

/// The standard row codec.
///
/// - `Bool` fields are stored as 0/1 integers.
/// - `Integer`, `Real` and `Text` fields accept the obvious coercions
///   (numeric text, integer to real).
/// - `Other` fields store scalars unchanged and arrays/maps as CBOR blobs.
/// - A stored NULL in a NOT NULL field decodes to the field's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRowCodec;

impl DefaultRowCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RowCodec for DefaultRowCodec {
    fn decode(&self, raw: Value, field: &FieldInfo) -> CodecResult<Value> {
        if raw.is_null() {
            return Ok(if field.null_allowed {
                Value::Null
            } else {
                field.default_value.clone()
            });
        }

        match field.field_type {
            FieldType::Text => match raw {
                Value::Text(_) => Ok(raw),
                Value::Integer(n) => Ok(Value::Text(n.to_string())),
                Value::Real(n) => Ok(Value::Text(n.to_string())),
                Value::Bytes(b) => String::from_utf8(b)
                    .map(Value::Text)
                    .map_err(|_| CodecError::unsupported(&field.name, "blob is not UTF-8")),
                other => Err(mismatch(field, &other)),
            },
            FieldType::Integer => match raw {
                Value::Integer(_) => Ok(raw),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| mismatch(field, &raw)),
                #[allow(clippy::cast_possible_truncation)]
                Value::Real(n) if n.fract() == 0.0 => Ok(Value::Integer(n as i64)),
                other => Err(mismatch(field, &other)),
            },
            FieldType::Real => match raw {
                Value::Real(_) => Ok(raw),
                #[allow(clippy::cast_precision_loss)]
                Value::Integer(n) => Ok(Value::Real(n as f64)),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| mismatch(field, &raw)),
                other => Err(mismatch(field, &other)),
            },
            FieldType::Bool => match raw {
                Value::Integer(n) => Ok(Value::Bool(n != 0)),
                Value::Real(n) => Ok(Value::Bool(n != 0.0)),
                Value::Text(ref s) => match s.trim() {
                    "0" | "false" | "FALSE" => Ok(Value::Bool(false)),
                    "1" | "true" | "TRUE" => Ok(Value::Bool(true)),
                    _ => Err(mismatch(field, &raw)),
                },
                other => Err(mismatch(field, &other)),
            },
            FieldType::Other => match raw {
                Value::Bytes(ref b) => match from_cbor(b) {
                    Ok(value @ (Value::Array(_) | Value::Map(_))) => Ok(value),
                    _ => Ok(raw),
                },
                other => Ok(other),
            },
        }
    }

    fn encode(&self, value: &Value, field: &FieldInfo) -> CodecResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Integer(_) | Value::Real(_) | Value::Text(_) | Value::Bytes(_) => {
                Ok(value.clone())
            }
            Value::Array(_) | Value::Map(_) if field.field_type == FieldType::Other => {
                Ok(Value::Bytes(to_cbor(value)?))
            }
            other => Err(mismatch(field, other)),
        }
    }
}

fn mismatch(field: &FieldInfo, value: &Value) -> CodecError {
    CodecError::unsupported(
        &field.name,
        format!("cannot convert {} to {}", value.kind_name(), field.field_type),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field(field_type: FieldType, null_allowed: bool) -> FieldInfo {
        FieldInfo::new("f", field_type, null_allowed, field_type.zero_value())
    }

    #[test]
    fn bools_are_stored_as_integers() {
        let codec = DefaultRowCodec::new();
        let f = field(FieldType::Bool, false);
        assert_eq!(codec.encode(&Value::Bool(true), &f).unwrap(), Value::Integer(1));
        assert_eq!(codec.decode(Value::Integer(0), &f).unwrap(), Value::Bool(false));
        assert_eq!(codec.decode(Value::Integer(7), &f).unwrap(), Value::Bool(true));
    }

    #[test]
    fn null_in_not_null_field_decodes_to_default() {
        let codec = DefaultRowCodec::new();
        let f = FieldInfo::new("n", FieldType::Integer, false, Value::Integer(5));
        assert_eq!(codec.decode(Value::Null, &f).unwrap(), Value::Integer(5));

        let nullable = field(FieldType::Integer, true);
        assert_eq!(codec.decode(Value::Null, &nullable).unwrap(), Value::Null);
    }

    #[test]
    fn numeric_coercions() {
        let codec = DefaultRowCodec::new();
        assert_eq!(
            codec.decode(Value::Integer(3), &field(FieldType::Real, false)).unwrap(),
            Value::Real(3.0)
        );
        assert_eq!(
            codec.decode(Value::from(" 12 "), &field(FieldType::Integer, false)).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            codec.decode(Value::Integer(12), &field(FieldType::Text, false)).unwrap(),
            Value::from("12")
        );
    }

    #[test]
    fn unsupported_conversions_fail() {
        let codec = DefaultRowCodec::new();
        let f = field(FieldType::Integer, false);
        assert!(matches!(
            codec.decode(Value::from("abc"), &f),
            Err(CodecError::UnsupportedType { .. })
        ));
        assert!(matches!(
            codec.encode(&Value::Array(vec![]), &f),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn structured_values_use_cbor_blobs() {
        let codec = DefaultRowCodec::new();
        let f = field(FieldType::Other, true);
        let value = Value::map(vec![(Value::from("k"), Value::Array(vec![Value::Integer(1)]))]);

        let raw = codec.encode(&value, &f).unwrap();
        assert!(raw.as_bytes().is_some());
        assert_eq!(codec.decode(raw, &f).unwrap(), value);
    }

    #[test]
    fn plain_blobs_stay_blobs() {
        let codec = DefaultRowCodec::new();
        let f = field(FieldType::Other, true);
        let raw = Value::Bytes(b"not cbor at all".to_vec());
        assert_eq!(codec.decode(raw.clone(), &f).unwrap(), raw);
    }

    proptest! {
        #[test]
        fn integers_survive_storage(n in any::<i64>()) {
            let codec = DefaultRowCodec::new();
            let f = field(FieldType::Integer, false);
            let raw = codec.encode(&Value::Integer(n), &f).unwrap();
            prop_assert_eq!(codec.decode(raw, &f).unwrap(), Value::Integer(n));
        }

        #[test]
        fn text_survives_storage(s in ".*") {
            let codec = DefaultRowCodec::new();
            let f = field(FieldType::Text, true);
            let raw = codec.encode(&Value::Text(s.clone()), &f).unwrap();
            prop_assert_eq!(codec.decode(raw, &f).unwrap(), Value::Text(s));
        }
    }
}
