//! Opaque column values and their tagged transport form.
//!
//! Primary keys and column payloads travel over a text-only transport. Each
//! value is encoded as `{"value_type": ..., "value": ...}` where byte strings
//! are hex encoded, so `BYTES` can never be confused with `STRING` on the
//! other side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A column or primary-key value as stored by the change log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireValue", into = "WireValue")]
pub enum Value {
	/// SQL `NULL` / absent value.
	None,
	/// UTF-8 text.
	String(String),
	/// Raw bytes.
	Bytes(Vec<u8>),
}

impl Value {
	pub fn is_none(&self) -> bool {
		matches!(self, Value::None)
	}

	/// Borrow the text payload, if this is a `String` value.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s.as_str()),
			_ => None,
		}
	}

	/// Encode into the tagged transport form.
	pub fn encode(&self) -> WireValue {
		match self {
			Value::None => WireValue {
				value_type: ValueType::None,
				value: String::new(),
			},
			Value::String(s) => WireValue {
				value_type: ValueType::String,
				value: s.clone(),
			},
			Value::Bytes(b) => WireValue {
				value_type: ValueType::Bytes,
				value: hex::encode(b),
			},
		}
	}

	/// Decode from the tagged transport form.
	pub fn decode(wire: WireValue) -> Result<Self, CodecError> {
		match wire.value_type {
			ValueType::None => Ok(Value::None),
			ValueType::String => Ok(Value::String(wire.value)),
			ValueType::Bytes => hex::decode(&wire.value)
				.map(Value::Bytes)
				.map_err(|e| CodecError::InvalidHex(e.to_string())),
		}
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::String(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::String(s)
	}
}

impl From<Vec<u8>> for Value {
	fn from(b: Vec<u8>) -> Self {
		Value::Bytes(b)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(v: Option<T>) -> Self {
		v.map(Into::into).unwrap_or(Value::None)
	}
}

/// Type tag of the transport form. Unknown tags fail deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
	None,
	String,
	Bytes,
}

/// The transport form of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
	pub value_type: ValueType,
	#[serde(default)]
	pub value: String,
}

impl From<Value> for WireValue {
	fn from(v: Value) -> Self {
		v.encode()
	}
}

impl TryFrom<WireValue> for Value {
	type Error = CodecError;

	fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
		Value::decode(wire)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
	#[error("invalid hex payload for bytes value: {0}")]
	InvalidHex(String),
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn bytes_are_hex_tagged() {
		let v = Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
		let json = serde_json::to_value(&v).unwrap();
		assert_eq!(json, json!({"value_type": "bytes", "value": "deadbeef"}));
	}

	#[test]
	fn string_that_looks_like_hex_stays_a_string() {
		let v = Value::from("deadbeef");
		let json = serde_json::to_string(&v).unwrap();
		let back: Value = serde_json::from_str(&json).unwrap();
		assert_eq!(back, Value::String("deadbeef".to_string()));
	}

	#[test]
	fn none_decodes_without_value_field() {
		let v: Value = serde_json::from_value(json!({"value_type": "none"})).unwrap();
		assert!(v.is_none());
	}

	#[test]
	fn unknown_tag_is_rejected() {
		let res: Result<Value, _> =
			serde_json::from_value(json!({"value_type": "integer", "value": "42"}));
		assert!(res.is_err());
	}

	#[test]
	fn malformed_hex_is_rejected() {
		let res: Result<Value, _> =
			serde_json::from_value(json!({"value_type": "bytes", "value": "xyz"}));
		let err = res.unwrap_err().to_string();
		assert!(err.contains("invalid hex"));
	}

	#[test]
	fn option_conversion() {
		assert_eq!(Value::from(None::<String>), Value::None);
		assert_eq!(Value::from(Some("a")), Value::String("a".into()));
	}
}
