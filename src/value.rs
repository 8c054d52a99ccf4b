// The closed Value variant set (§3). Every variant owns its payload
// (String, Vec, BTreeMap) rather than sharing it through an Rc/Arc, which is
// what makes `Value::clone()` a true deep copy — the isolation invariant
// required of every row returned from `Query`/`Filter`/`GetTableInfo` falls
// out of this for free, no custom deep-clone walk needed.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Vector(Vec<f32>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// The variant tag only, used for schema column types and dimension checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Timestamp,
    Vector,
    List,
    Map,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Vector(_) => ValueType::Vector,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort numeric view, used by comparison operators and ordered
    /// index keys. Returns `None` for non-numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Timestamp(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_) | Value::Timestamp(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_of_nested_value_is_independent() {
        let mut original = Value::List(vec![Value::String("a".into()), Value::String("b".into())]);
        let copy = original.clone();

        if let Value::List(items) = &mut original {
            items[0] = Value::String("HACKED".into());
        }

        assert_eq!(copy, Value::List(vec![Value::String("a".into()), Value::String("b".into())]));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Int32(5).as_f64(), Some(5.0));
        assert_eq!(Value::String("x".into()).as_f64(), None);
    }
}
