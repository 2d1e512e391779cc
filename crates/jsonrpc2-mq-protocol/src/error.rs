use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error_codes;

/// JSON-RPC Error object as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An application-defined error kind, identified by its code.
///
/// Instances are handed out by [`crate::ErrorRegistry::register`]; two kinds
/// are equal when code and name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisteredKind {
    code: i64,
    name: Arc<str>,
}

impl RegisteredKind {
    pub(crate) fn new(code: i64, name: &str) -> Self {
        Self {
            code,
            name: Arc::from(name),
        }
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Every kind of error a JSON-RPC exchange can produce
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Implementation-defined server fault, -32099 to -32000
    ServerError(i64),
    /// Any unregistered code outside the reserved ranges
    ApplicationError(i64),
    /// A kind an application registered for its own code
    Registered(RegisteredKind),
}

impl ErrorKind {
    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::ParseError => error_codes::PARSE_ERROR,
            ErrorKind::InvalidRequest => error_codes::INVALID_REQUEST,
            ErrorKind::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            ErrorKind::InvalidParams => error_codes::INVALID_PARAMS,
            ErrorKind::InternalError => error_codes::INTERNAL_ERROR,
            ErrorKind::ServerError(code) | ErrorKind::ApplicationError(code) => *code,
            ErrorKind::Registered(kind) => kind.code(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::MethodNotFound => "MethodNotFound",
            ErrorKind::InvalidParams => "InvalidParams",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::ServerError(_) => "ServerError",
            ErrorKind::ApplicationError(_) => "ApplicationError",
            ErrorKind::Registered(kind) => kind.name(),
        }
    }

    /// Message used when an error is raised without one
    pub fn default_message(&self) -> String {
        match self {
            ErrorKind::ParseError => "Parse error".to_string(),
            ErrorKind::InvalidRequest => "Invalid Request".to_string(),
            ErrorKind::MethodNotFound => "Method not found".to_string(),
            ErrorKind::InvalidParams => "Invalid params".to_string(),
            ErrorKind::InternalError => "Internal error".to_string(),
            other => friendly_name(other.name()),
        }
    }

    /// One of the five fixed protocol kinds
    pub fn is_reserved(&self) -> bool {
        error_codes::is_reserved(self.code())
            && !matches!(self, ErrorKind::Registered(_) | ErrorKind::ApplicationError(_))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Split a CamelCase kind name into words: `MethodNotFound` → `Method Not Found`.
/// Runs of capitals stay together: `HTTPFailure` → `HTTP Failure`.
pub fn friendly_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if i > 0 && c.is_uppercase() && next_is_lower {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// A JSON-RPC error raised by a handler or reconstructed from a response
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: Option<String>, data: Option<Value>) -> Self {
        let message = message.unwrap_or_else(|| kind.default_message());
        Self {
            kind,
            message,
            data,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorKind::ParseError, None, None)
    }

    pub fn invalid_request(message: Option<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            Some(format!("Method '{}' not found", method)),
            None,
        )
    }

    pub fn invalid_params(message: Option<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message, None)
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(ErrorKind::InternalError, message, None)
    }

    /// Generic server fault with the catch-all server code
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ServerError(error_codes::GENERIC_SERVER_ERROR),
            Some(message.into()),
            None,
        )
    }

    pub fn application(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApplicationError(code), Some(message.into()), None)
    }

    pub fn registered(kind: &RegisteredKind, message: Option<String>) -> Self {
        Self::new(ErrorKind::Registered(kind.clone()), message, None)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code(), self.message)?;
        if let Some(data) = self.data.as_ref().filter(|d| !d.is_null()) {
            write!(f, "\nError data: {}", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
