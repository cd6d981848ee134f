//! Resource values and string coercion

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single resource value as carried in gateway payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Converts user or wire text into the most specific value
    ///
    /// `true`/`false` in any case become booleans, integral numbers become
    /// integers (`"2.0"` included), other numbers become floats and anything
    /// else stays a string.
    pub fn coerce(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Boolean(false);
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::Integer(int);
        }
        match trimmed.parse::<f64>() {
            Ok(float) if is_integral(float) => Value::Integer(float as i64),
            Ok(float) => Value::Float(float),
            Err(_) => Value::String(raw.to_string()),
        }
    }

    /// Coerces string values; typed values are returned unchanged
    pub fn coerced(self) -> Value {
        match self {
            Value::String(s) => Value::coerce(&s),
            other => other,
        }
    }

    /// Type tag used by the gateway for this value
    pub fn wire_type(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn is_integral(float: f64) -> bool {
    float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_booleans_any_case() {
        assert_eq!(Value::coerce("true"), Value::Boolean(true));
        assert_eq!(Value::coerce("TRUE"), Value::Boolean(true));
        assert_eq!(Value::coerce("False"), Value::Boolean(false));
        assert_eq!(Value::coerce(" true "), Value::Boolean(true));
        assert_eq!(Value::coerce("false\n"), Value::Boolean(false));
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(Value::coerce("60"), Value::Integer(60));
        assert_eq!(Value::coerce("-3"), Value::Integer(-3));
        assert_eq!(Value::coerce("2.0"), Value::Integer(2));
        assert_eq!(Value::coerce("1e3"), Value::Integer(1000));
        assert_eq!(Value::coerce("3.25"), Value::Float(3.25));
        assert_eq!(Value::coerce(" 7 "), Value::Integer(7));
    }

    #[test]
    fn test_coerce_leaves_text() {
        assert_eq!(Value::coerce("coap://host"), Value::String("coap://host".into()));
        assert_eq!(Value::coerce(""), Value::String(String::new()));
    }

    #[test]
    fn test_coercion_is_idempotent() {
        for raw in ["true", "False", "12", "2.0", "0.5", "hello", "", "1e3"] {
            let once = Value::coerce(raw);
            let twice = once.clone().coerced();
            assert_eq!(once, twice, "coercing {:?} twice changed it", raw);
        }
        assert_eq!(Value::Float(2.0).coerced(), Value::Float(2.0));
        assert_eq!(Value::Integer(5).coerced(), Value::Integer(5));
    }

    #[test]
    fn test_wire_types() {
        assert_eq!(Value::from(true).wire_type(), "Boolean");
        assert_eq!(Value::from(1).wire_type(), "Integer");
        assert_eq!(Value::from(1.5).wire_type(), "Float");
        assert_eq!(Value::from("x").wire_type(), "String");
    }
}
