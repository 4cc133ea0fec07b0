//! # Values
//!
//! The closed set of data shapes that cross the bridge. Replies are decoded into
//! `Value` once at the codec boundary, so nothing past it inspects raw JSON.
//!
//! Integers and floats stay distinct: a reply of `20` is `Int(20)` and a reply of
//! `20.0` is `Float(20.0)`. `TryFrom<Value> for f64` accepts both.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::error::RpcError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Looks up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Exact conversion of an unsigned integer. Fails above `i64::MAX`.
    pub fn try_from_u64(i: u64) -> Result<Value> {
        i64::try_from(i).map(Value::Int).map_err(|_| RpcError::TypeMismatch {
            expected: "int",
            found: format!("u64 {}", i),
        })
    }

    fn mismatch(expected: &'static str, found: &Value) -> RpcError {
        RpcError::TypeMismatch { expected, found: found.type_name().to_string() }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Converts any serializable Rust value into a `Value`.
pub fn to_value<T: Serialize>(value: T) -> Result<Value> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::from_value(json)?)
}

/// Deserializes a `Value` into a typed Rust structure.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::from_value(json)?)
}

// ============================================================================
//  CONVERSIONS INTO VALUE
// ============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self { Value::Null }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self { Value::Int(i as i64) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self { Value::Int(i as i64) }
}

/// Values above `i64::MAX` have no integer representation on the wire and
/// become the nearest `Float`. Use `Value::try_from_u64` to refuse them instead.
impl From<u64> for Value {
    fn from(i: u64) -> Self {
        match i64::try_from(i) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(i as f64),
        }
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self { Value::Float(x as f64) }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Value::Float(x) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Str(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Str(s) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(items: [T; N]) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self { Value::Map(m) }
}

// ============================================================================
//  CONVERSIONS OUT OF VALUE
// ============================================================================

impl TryFrom<Value> for bool {
    type Error = RpcError;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::Bool(b) => Ok(b),
            other => Err(Value::mismatch("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = RpcError;

    fn try_from(v: Value) -> Result<Self> {
        v.as_i64().ok_or_else(|| Value::mismatch("int", &v))
    }
}

impl TryFrom<Value> for f64 {
    type Error = RpcError;

    fn try_from(v: Value) -> Result<Self> {
        v.as_f64().ok_or_else(|| Value::mismatch("float", &v))
    }
}

impl TryFrom<Value> for String {
    type Error = RpcError;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(Value::mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = RpcError;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::List(items) => Ok(items),
            other => Err(Value::mismatch("list", &other)),
        }
    }
}

impl TryFrom<Value> for () {
    type Error = RpcError;

    fn try_from(_: Value) -> Result<Self> {
        Ok(())
    }
}
