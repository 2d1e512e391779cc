use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::ErrorObject;
use crate::types::{JsonRpcVersion, RequestId};

/// What a response carries: a result or an error, never both
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success result (may be `null` for void methods)
    Result(Value),
    /// Error object
    Error(ErrorObject),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// A JSON-RPC response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub version: JsonRpcVersion,
    pub outcome: Outcome,
    /// Id of the originating request; `None` only for errors raised before
    /// a request could be read
    pub id: Option<RequestId>,
}

impl Response {
    pub fn new(id: Option<RequestId>, outcome: Outcome) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            outcome,
            id,
        }
    }

    pub fn success(id: RequestId, result: Value) -> Self {
        Self::new(Some(id), Outcome::Result(result))
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self::new(id, Outcome::Error(error))
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(error) => Some(error),
            Outcome::Result(_) => None,
        }
    }

    /// Rebuild a response from a decoded object that has the response shape.
    ///
    /// A non-null `error` wins; otherwise `result` (defaulting to null) is
    /// the outcome. `None` when the id or the error object is unusable.
    pub(crate) fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        let id = RequestId::from_json(obj.get("id")?).ok()?;
        let outcome = match obj.get("error") {
            Some(error) if !error.is_null() => {
                Outcome::Error(serde_json::from_value(error.clone()).ok()?)
            }
            _ => Outcome::Result(obj.get("result").cloned().unwrap_or(Value::Null)),
        };
        Some(Self::new(id, outcome))
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", &self.version)?;
        match &self.outcome {
            Outcome::Result(value) => map.serialize_entry("result", value)?,
            Outcome::Error(error) => map.serialize_entry("error", error)?,
        }
        map.serialize_entry("id", &self.id)?;
        map.end()
    }
}
