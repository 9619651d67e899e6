//! Typed scalar values for schema-driven rows.
//!
//! Declared tables only exist at runtime, so rows are generic maps from
//! column name to [`Value`] validated against the compiled schema instead
//! of static record types.

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::ser::{Serialize, Serializer};

use crate::config::columns::ScalarType;

/// One typed cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Text(String),
    Null,
}

impl Value {
    /// Convert a raw detection string through a column's declared type.
    pub fn convert(raw: &str, ty: ScalarType) -> Option<Value> {
        match ty {
            ScalarType::Int => raw.trim().parse().ok().map(Value::Int),
            ScalarType::Text => Some(Value::Text(raw.to_string())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Int(i) => i.to_sql(),
            Value::Text(s) => s.to_sql(),
            Value::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Null => serializer.serialize_none(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_conversion() {
        assert_eq!(Value::convert("42", ScalarType::Int), Some(Value::Int(42)));
        assert_eq!(Value::convert(" 7 ", ScalarType::Int), Some(Value::Int(7)));
        assert_eq!(Value::convert("x", ScalarType::Int), None);
    }

    #[test]
    fn text_conversion_is_verbatim() {
        assert_eq!(
            Value::convert(" spaced ", ScalarType::Text),
            Some(Value::Text(" spaced ".to_string()))
        );
    }

    #[test]
    fn serializes_as_json_scalars() {
        assert_eq!(serde_json::to_string(&Value::Int(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&Value::Text("a".to_string())).unwrap(),
            "\"a\""
        );
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
    }
}
