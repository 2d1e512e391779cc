use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;
use crate::types::{JsonRpcVersion, RequestId};

/// Parameters for a JSON-RPC request
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl RequestParams {
    /// Positional parameters from anything yielding JSON values
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        RequestParams::Array(values.into_iter().collect())
    }

    /// Named parameters from `(name, value)` pairs
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        RequestParams::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Get a parameter by name (for object params)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RequestParams::Object(map) => map.get(key),
            RequestParams::Array(_) => None, // Can't get by name from array
        }
    }

    /// Get a parameter by index (for array params only)
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            RequestParams::Array(vec) => vec.get(index),
            RequestParams::Object(_) => None, // Can't get by index from object
        }
    }

    pub fn is_positional(&self) -> bool {
        matches!(self, RequestParams::Array(_))
    }

    /// Check if parameters are empty
    pub fn is_empty(&self) -> bool {
        match self {
            RequestParams::Object(map) => map.is_empty(),
            RequestParams::Array(vec) => vec.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RequestParams::Object(map) => map.len(),
            RequestParams::Array(vec) => vec.len(),
        }
    }

    /// Convert to a serde_json::Value
    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Array(arr) => Value::Array(arr.clone()),
        }
    }

    /// Deserialize the parameters into a typed value.
    ///
    /// Positional parameters map onto tuples, sequences and tuple structs;
    /// named parameters map onto structs and maps. A mismatch is reported as
    /// `InvalidParams` so handlers can return it to the caller unchanged.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.to_value())
            .map_err(|e| RpcError::invalid_params(Some(e.to_string())))
    }

    /// Like [`RequestParams::parse`] for an optional parameter set; absent
    /// parameters are treated as an empty positional list.
    pub fn parse_optional<T: DeserializeOwned>(params: Option<&Self>) -> Result<T, RpcError> {
        match params {
            Some(params) => params.parse(),
            None => RequestParams::Array(Vec::new()).parse(),
        }
    }

    pub(crate) fn from_json(value: &Value) -> Result<Option<Self>, ()> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(RequestParams::Array(items.clone()))),
            Value::Object(map) => Ok(Some(RequestParams::Object(map.clone()))),
            _ => Err(()),
        }
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

impl From<Vec<Value>> for RequestParams {
    fn from(vec: Vec<Value>) -> Self {
        RequestParams::Array(vec)
    }
}

/// A JSON-RPC request; without an id it is a notification.
///
/// The id is decided at construction: [`Request::new`] generates one,
/// [`Request::with_id`] takes the caller's, and [`Request::notification`]
/// leaves it absent. There is no way to ask for both a generated and an
/// absent id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// A method call with a freshly generated id
    pub fn new(method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self::with_id(method, params, RequestId::generate())
    }

    /// A method call with an explicit id
    pub fn with_id(
        method: impl Into<String>,
        params: Option<RequestParams>,
        id: impl Into<RequestId>,
    ) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// A notification: no id, never answered
    pub fn notification(method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_method(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// Get a parameter by index (if params are an array)
    pub fn get_param_index(&self, index: usize) -> Option<&Value> {
        self.params.as_ref()?.get_index(index)
    }

    /// Rebuild a request from a decoded object that has the request shape.
    /// `None` when a field holds a value a request cannot carry.
    pub(crate) fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        let method = obj.get("method")?.as_str()?.to_string();
        let params = match obj.get("params") {
            Some(value) => RequestParams::from_json(value).ok()?,
            None => None,
        };
        let id = match obj.get("id") {
            Some(value) => RequestId::from_json(value).ok()?,
            None => None,
        };
        Some(Self {
            version: JsonRpcVersion::V2_0,
            method,
            params,
            id,
        })
    }
}
