//! Cell values and their tagged storage encoding.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Serialize, Serializer};
use serde_json::Value as Json;

/// The value carried by a message.
///
/// Only these three shapes exist; anything else is rejected at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A double precision number.
    Number(f64),
    /// A text value.
    String(String),
}

impl Value {
    /// Encodes the value with its type tag (`0:`, `N:` or `S:`).
    ///
    /// Numbers use the shortest decimal that parses back to the same `f64`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] for NaN and infinities.
    pub fn tag(&self) -> ProtocolResult<String> {
        match self {
            Value::Null => Ok("0:".to_string()),
            Value::Number(n) if n.is_finite() => Ok(format!("N:{n}")),
            Value::Number(n) => Err(ProtocolError::Serialization(format!(
                "non-finite number {n}"
            ))),
            Value::String(s) => Ok(format!("S:{s}")),
        }
    }

    /// Decodes a tagged value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Serialization`] for an unknown tag or an
    /// unparseable number.
    pub fn detag(tagged: &str) -> ProtocolResult<Self> {
        match tagged.split_at_checked(2) {
            Some(("0:", "")) => Ok(Value::Null),
            Some(("N:", digits)) => digits
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::Number)
                .ok_or_else(|| {
                    ProtocolError::Serialization(format!("invalid number {digits:?}"))
                }),
            Some(("S:", text)) => Ok(Value::String(text.to_string())),
            _ => Err(ProtocolError::Serialization(format!(
                "invalid type tag in {tagged:?}"
            ))),
        }
    }

    /// Converts to JSON.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
        }
    }
}

impl TryFrom<Json> for Value {
    type Error = ProtocolError;

    fn try_from(json: Json) -> Result<Self, Self::Error> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Number(n) => n.as_f64().map(Value::Number).ok_or_else(|| {
                ProtocolError::Serialization(format!("number {n} is not representable"))
            }),
            Json::String(s) => Ok(Value::String(s)),
            Json::Bool(_) => Err(ProtocolError::Serialization("boolean".into())),
            Json::Array(_) => Err(ProtocolError::Serialization("array".into())),
            Json::Object(_) => Err(ProtocolError::Serialization("object".into())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
        }
    }
}
