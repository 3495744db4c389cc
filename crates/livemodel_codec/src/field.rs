//! Field descriptors.

use crate::value::Value;
use std::fmt;

/// Semantic type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldType {
    /// Anything that is not one of the scalar types: stored as-is, or as a
    /// CBOR blob for structured values.
    #[default]
    Other,
    /// UTF-8 text.
    Text,
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Real,
    /// Boolean stored as 0/1.
    Bool,
}

impl FieldType {
    /// Derives the field type from a declared SQL column type.
    ///
    /// Follows SQLite's affinity rules, except that any declared type
    /// containing `BOOL` maps to [`FieldType::Bool`].
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BOOL") {
            FieldType::Bool
        } else if upper.contains("INT") {
            FieldType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            FieldType::Text
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            FieldType::Real
        } else {
            FieldType::Other
        }
    }

    /// The value a NOT NULL field without an explicit default starts with.
    pub fn zero_value(self) -> Value {
        match self {
            FieldType::Other => Value::Null,
            FieldType::Text => Value::Text(String::new()),
            FieldType::Integer => Value::Integer(0),
            FieldType::Real => Value::Real(0.0),
            FieldType::Bool => Value::Bool(false),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Other => "other",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Describes one field of a model.
///
/// Field descriptors are derived from the table schema the first time a
/// model is used and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub field_type: FieldType,
    /// Whether NULL is an acceptable value.
    pub null_allowed: bool,
    /// Value a new instance starts with.
    pub default_value: Value,
}

impl FieldInfo {
    /// Creates a field descriptor.
    pub fn new(
        name: impl Into<String>,
        field_type: FieldType,
        null_allowed: bool,
        default_value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            null_allowed,
            default_value,
        }
    }

    /// Builds a descriptor from column metadata as reported by the engine.
    ///
    /// `default_sql` is the column's default expression, if any. Expressions
    /// that are not literals (e.g. `CURRENT_TIMESTAMP`) are treated as having
    /// no default.
    pub fn from_column(
        name: impl Into<String>,
        declared_type: &str,
        not_null: bool,
        default_sql: Option<&str>,
    ) -> Self {
        let field_type = FieldType::from_declared_type(declared_type);
        let parsed = default_sql.and_then(|sql| parse_default_literal(sql, field_type));
        let default_value = match parsed {
            Some(value) => value,
            None if not_null => field_type.zero_value(),
            None => Value::Null,
        };

        Self::new(name, field_type, !not_null, default_value)
    }
}

/// Parses a literal SQL default expression.
fn parse_default_literal(sql: &str, field_type: FieldType) -> Option<Value> {
    let trimmed = sql.trim();
    let unwrapped = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map_or(trimmed, str::trim);

    if unwrapped.eq_ignore_ascii_case("NULL") {
        return Some(Value::Null);
    }

    if let Some(text) = unwrapped
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        let text = text.replace("''", "'");
        return Some(coerce_text_default(text, field_type));
    }

    if unwrapped.eq_ignore_ascii_case("TRUE") {
        return Some(bool_default(true, field_type));
    }
    if unwrapped.eq_ignore_ascii_case("FALSE") {
        return Some(bool_default(false, field_type));
    }

    if let Ok(n) = unwrapped.parse::<i64>() {
        return Some(match field_type {
            FieldType::Bool => Value::Bool(n != 0),
            #[allow(clippy::cast_precision_loss)]
            FieldType::Real => Value::Real(n as f64),
            FieldType::Text => Value::Text(unwrapped.to_string()),
            FieldType::Integer | FieldType::Other => Value::Integer(n),
        });
    }

    if let Ok(n) = unwrapped.parse::<f64>() {
        return Some(match field_type {
            FieldType::Text => Value::Text(unwrapped.to_string()),
            _ => Value::Real(n),
        });
    }

    None
}

fn coerce_text_default(text: String, field_type: FieldType) -> Value {
    match field_type {
        FieldType::Integer => text
            .parse::<i64>()
            .map_or(Value::Text(text), Value::Integer),
        FieldType::Real => text.parse::<f64>().map_or(Value::Text(text), Value::Real),
        FieldType::Bool => match text.as_str() {
            "0" | "false" | "FALSE" => Value::Bool(false),
            "1" | "true" | "TRUE" => Value::Bool(true),
            _ => Value::Text(text),
        },
        FieldType::Text | FieldType::Other => Value::Text(text),
    }
}

fn bool_default(b: bool, field_type: FieldType) -> Value {
    match field_type {
        FieldType::Integer => Value::Integer(i64::from(b)),
        _ => Value::Bool(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_affinity() {
        assert_eq!(FieldType::from_declared_type("INTEGER"), FieldType::Integer);
        assert_eq!(FieldType::from_declared_type("bigint"), FieldType::Integer);
        assert_eq!(FieldType::from_declared_type("BOOLEAN"), FieldType::Bool);
        assert_eq!(FieldType::from_declared_type("VARCHAR(32)"), FieldType::Text);
        assert_eq!(FieldType::from_declared_type("TEXT"), FieldType::Text);
        assert_eq!(FieldType::from_declared_type("DOUBLE"), FieldType::Real);
        assert_eq!(FieldType::from_declared_type("REAL"), FieldType::Real);
        assert_eq!(FieldType::from_declared_type("BLOB"), FieldType::Other);
        assert_eq!(FieldType::from_declared_type(""), FieldType::Other);
    }

    #[test]
    fn not_null_without_default_gets_zero_value() {
        let field = FieldInfo::from_column("name", "TEXT", true, None);
        assert!(!field.null_allowed);
        assert_eq!(field.default_value, Value::Text(String::new()));

        let field = FieldInfo::from_column("count", "INTEGER", true, None);
        assert_eq!(field.default_value, Value::Integer(0));
    }

    #[test]
    fn nullable_without_default_is_null() {
        let field = FieldInfo::from_column("nickname", "TEXT", false, None);
        assert!(field.null_allowed);
        assert_eq!(field.default_value, Value::Null);
    }

    #[test]
    fn literal_defaults_are_parsed() {
        let field = FieldInfo::from_column("name", "TEXT", true, Some("'it''s'"));
        assert_eq!(field.default_value, Value::from("it's"));

        let field = FieldInfo::from_column("n", "INTEGER", true, Some("42"));
        assert_eq!(field.default_value, Value::Integer(42));

        let field = FieldInfo::from_column("ratio", "REAL", true, Some("1"));
        assert_eq!(field.default_value, Value::Real(1.0));

        let field = FieldInfo::from_column("flag", "BOOL", true, Some("1"));
        assert_eq!(field.default_value, Value::Bool(true));

        let field = FieldInfo::from_column("flag", "BOOL", false, Some("FALSE"));
        assert_eq!(field.default_value, Value::Bool(false));

        let field = FieldInfo::from_column("n", "INTEGER", false, Some("(-7)"));
        assert_eq!(field.default_value, Value::Integer(-7));

        let field = FieldInfo::from_column("n", "INTEGER", false, Some("NULL"));
        assert_eq!(field.default_value, Value::Null);
    }

    #[test]
    fn expression_defaults_fall_back() {
        let field = FieldInfo::from_column("created", "INTEGER", true, Some("CURRENT_TIMESTAMP"));
        assert_eq!(field.default_value, Value::Integer(0));
    }
}
