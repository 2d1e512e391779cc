//! Wire codec
//!
//! Messages are JSON objects tagged with `"jsonrpc": "2.0"`. Decoding does
//! not rely on explicit tags: the top-level object is rebuilt by its shape.
//! An object with `jsonrpc` and `method` is a [`Request`], one with
//! `jsonrpc`, `id` and `result` or `error` is a [`Response`], and everything
//! else is handed back untouched for the caller to reject.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::error::RpcError;
use crate::request::Request;
use crate::response::Response;
use crate::types::RequestId;

/// Errors raised while turning messages into bytes and back
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Parse(_) => RpcError::parse_error(),
            CodecError::Encode(e) => RpcError::internal_error(Some(e.to_string())),
        }
    }
}

/// Result of decoding one message
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Request(Request),
    Response(Response),
    /// Well-formed JSON without a message shape
    Other(Value),
}

impl Decoded {
    /// The correlation id carried by the decoded value, if any.
    ///
    /// Shapeless objects still report a usable `id` member so callers can
    /// tell a stray reply from a malformed one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Decoded::Request(request) => request.id.as_ref(),
            Decoded::Response(response) => response.id.as_ref(),
            Decoded::Other(_) => None,
        }
    }

    /// Like [`Decoded::id`], but also reads the `id` member of shapeless objects
    pub fn correlation_id(&self) -> Option<RequestId> {
        match self {
            Decoded::Other(Value::Object(obj)) => obj
                .get("id")
                .and_then(|v| RequestId::from_json(v).ok().flatten()),
            other => other.id().cloned(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Decoded::Request(r) if r.is_notification() => "notification",
            Decoded::Request(_) => "method call",
            Decoded::Response(_) => "response",
            Decoded::Other(_) => "non-message value",
        }
    }
}

/// Serialize a message (or any serializable value) to wire bytes
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(CodecError::Encode)
}

/// Produce the transportable form of a value for use as params or result
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(CodecError::Encode)
}

/// Parse wire bytes and rebuild the message by shape
pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
    let value: Value = serde_json::from_slice(bytes).map_err(CodecError::Parse)?;
    Ok(reconstruct(value))
}

fn reconstruct(value: Value) -> Decoded {
    let shaped = match &value {
        Value::Object(obj) if obj.contains_key("jsonrpc") => {
            if obj.contains_key("method") {
                Request::from_object(obj).map(Decoded::Request)
            } else if obj.contains_key("id")
                && (obj.contains_key("result") || obj.contains_key("error"))
            {
                Response::from_object(obj).map(Decoded::Response)
            } else {
                None
            }
        }
        _ => None,
    };
    shaped.unwrap_or(Decoded::Other(value))
}

const UTC_SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Serde helpers for timestamps on the wire: UTC ISO-8601, truncated to whole
/// seconds, with a literal `Z`. Sub-second precision is dropped on encode.
///
/// ```rust
/// use chrono::{DateTime, Utc};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Event {
///     #[serde(with = "jsonrpc2_mq_protocol::codec::utc_seconds")]
///     at: DateTime<Utc>,
/// }
/// ```
pub mod utc_seconds {
    use super::*;

    pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&at.format(UTC_SECONDS_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A timestamp that serializes the way [`utc_seconds`] does, for use inside
/// untyped params (`json!` values, positional argument lists)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtcSeconds(pub DateTime<Utc>);

impl<Tz: TimeZone> From<DateTime<Tz>> for UtcSeconds {
    fn from(at: DateTime<Tz>) -> Self {
        UtcSeconds(at.with_timezone(&Utc))
    }
}

impl Serialize for UtcSeconds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        utc_seconds::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for UtcSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        utc_seconds::deserialize(deserializer).map(UtcSeconds)
    }
}
