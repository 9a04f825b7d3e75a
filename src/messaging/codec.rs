//! Envelope encoding for inter-server traffic.
//!
//! Two envelope shapes travel on the bus: invocations (with optional
//! connection-id exclusions) and group-control messages. Invocation arguments
//! are polymorphic, so every value carries a `$type` discriminator on the
//! wire; a receiving server rehydrates the original runtime type without
//! knowing the method signature. This codec is independent from whatever
//! serializer the client-facing transport uses.

use crate::messaging::protocol::{ControlMessage, ExcludingInvocationMessage};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected envelope kind")]
    UnexpectedEnvelope,
}

/// A self-describing argument value.
///
/// The discriminator set covers the JSON-shaped types plus `custom` for
/// caller-registered types, which travel as a type name and raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type", content = "value", rename_all = "lowercase")]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
    Custom {
        type_name: String,
        payload: serde_json::Value,
    },
}

impl ArgValue {
    pub fn custom(type_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Custom {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Lift an untyped JSON value into a tagged argument.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Drop the type tags and return the plain JSON shape.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Int(i) => serde_json::Value::from(i),
            Self::Float(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::String(s) => serde_json::Value::String(s),
            Self::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Self::into_json).collect())
            }
            Self::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
            Self::Custom { payload, .. } => payload,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t")]
enum Envelope {
    #[serde(rename = "inv")]
    Invocation(ExcludingInvocationMessage),
    #[serde(rename = "ctl")]
    Control(ControlMessage),
}

/// Stateless encoder/decoder for the two envelope shapes.
pub struct WireCodec;

impl WireCodec {
    pub fn encode_invocation(message: &ExcludingInvocationMessage) -> Result<Bytes, CodecError> {
        let bytes = serde_json::to_vec(&Envelope::Invocation(message.clone()))?;
        Ok(Bytes::from(bytes))
    }

    pub fn decode_invocation(payload: &[u8]) -> Result<ExcludingInvocationMessage, CodecError> {
        match serde_json::from_slice(payload)? {
            Envelope::Invocation(message) => Ok(message),
            Envelope::Control(_) => Err(CodecError::UnexpectedEnvelope),
        }
    }

    pub fn encode_control(message: &ControlMessage) -> Result<Bytes, CodecError> {
        let bytes = serde_json::to_vec(&Envelope::Control(message.clone()))?;
        Ok(Bytes::from(bytes))
    }

    pub fn decode_control(payload: &[u8]) -> Result<ControlMessage, CodecError> {
        match serde_json::from_slice(payload)? {
            Envelope::Control(message) => Ok(message),
            Envelope::Invocation(_) => Err(CodecError::UnexpectedEnvelope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::protocol::InvocationMessage;

    #[test]
    fn arguments_keep_their_type_identity() {
        let message = InvocationMessage::non_blocking(
            3,
            "Mixed",
            vec![
                ArgValue::Int(42),
                ArgValue::Float(42.0),
                ArgValue::String("42".into()),
                ArgValue::Bool(false),
                ArgValue::Null,
            ],
        );
        let encoded =
            WireCodec::encode_invocation(&ExcludingInvocationMessage::without_exclusions(message))
                .unwrap();
        let decoded = WireCodec::decode_invocation(&encoded).unwrap();

        // An untagged encoding would collapse 42 / 42.0 / "42" on a receiver
        // that has no signature to look at.
        assert_eq!(decoded.message.arguments[0], ArgValue::Int(42));
        assert_eq!(decoded.message.arguments[1], ArgValue::Float(42.0));
        assert_eq!(decoded.message.arguments[2], ArgValue::String("42".into()));
    }

    #[test]
    fn custom_values_carry_a_type_name() {
        let payload = serde_json::json!({"lat": 52.1, "lon": 4.3});
        let message = InvocationMessage::non_blocking(
            1,
            "Locate",
            vec![ArgValue::custom("GeoPoint", payload.clone())],
        );
        let encoded =
            WireCodec::encode_invocation(&ExcludingInvocationMessage::without_exclusions(message))
                .unwrap();
        let decoded = WireCodec::decode_invocation(&encoded).unwrap();
        assert_eq!(
            decoded.message.arguments[0],
            ArgValue::custom("GeoPoint", payload)
        );
    }

    #[test]
    fn control_messages_round_trip() {
        let message = ControlMessage::add(9, "c1", "room", "server-a");
        let encoded = WireCodec::encode_control(&message).unwrap();
        assert_eq!(WireCodec::decode_control(&encoded).unwrap(), message);
    }

    #[test]
    fn envelope_kinds_do_not_cross() {
        let control = ControlMessage::ack(4, "server-a");
        let encoded = WireCodec::encode_control(&control).unwrap();
        assert!(matches!(
            WireCodec::decode_invocation(&encoded),
            Err(CodecError::UnexpectedEnvelope)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            WireCodec::decode_control(b"not json"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn json_conversion_is_lossless_for_plain_shapes() {
        let value = serde_json::json!({"a": [1, 2.5, "x", null], "b": true});
        let lifted = ArgValue::from_json(value.clone());
        assert_eq!(lifted.into_json(), value);
    }
}
