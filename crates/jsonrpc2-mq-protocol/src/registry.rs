//! Error kind registry
//!
//! Maps application-defined error codes to [`RegisteredKind`]s so that an
//! error raised by a server handler comes back to the client as the same
//! kind. The process-wide registry is populated explicitly, usually once at
//! start-up; the first registration for a code wins and later ones leave the
//! entry untouched.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::error::{ErrorKind, ErrorObject, RegisteredKind, RpcError};
use crate::error_codes;

/// Errors raised while registering an error kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Error code {0} is reserved by JSON-RPC and cannot be registered")]
    ReservedCode(i64),
}

/// Code → kind table
#[derive(Debug, Default)]
pub struct ErrorRegistry {
    kinds: RwLock<HashMap<i64, RegisteredKind>>,
}

impl ErrorRegistry {
    /// An empty registry, e.g. for per-client overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static ErrorRegistry {
        static GLOBAL: OnceLock<ErrorRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ErrorRegistry::new)
    }

    /// Register `name` for `code`.
    ///
    /// Returns the kind now associated with the code, which is the earlier
    /// registration if the code was already taken.
    pub fn register(&self, code: i64, name: &str) -> Result<RegisteredKind, RegistrationError> {
        if error_codes::is_reserved(code) {
            return Err(RegistrationError::ReservedCode(code));
        }
        let mut kinds = self.kinds.write();
        Ok(kinds
            .entry(code)
            .or_insert_with(|| RegisteredKind::new(code, name))
            .clone())
    }

    pub fn lookup(&self, code: i64) -> Option<RegisteredKind> {
        self.kinds.read().get(&code).cloned()
    }

    pub fn len(&self) -> usize {
        self.kinds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.read().is_empty()
    }

    /// Kind for a wire code: fixed protocol codes first, then `overrides`,
    /// then the global registry, then the server/application fallback by range.
    pub fn resolve(code: i64, overrides: Option<&ErrorRegistry>) -> ErrorKind {
        match code {
            error_codes::PARSE_ERROR => return ErrorKind::ParseError,
            error_codes::INVALID_REQUEST => return ErrorKind::InvalidRequest,
            error_codes::METHOD_NOT_FOUND => return ErrorKind::MethodNotFound,
            error_codes::INVALID_PARAMS => return ErrorKind::InvalidParams,
            error_codes::INTERNAL_ERROR => return ErrorKind::InternalError,
            _ => {}
        }

        let registered = overrides
            .and_then(|o| o.lookup(code))
            .or_else(|| Self::global().lookup(code));
        if let Some(kind) = registered {
            return ErrorKind::Registered(kind);
        }

        if error_codes::is_server_error(code) {
            ErrorKind::ServerError(code)
        } else {
            ErrorKind::ApplicationError(code)
        }
    }

    /// Turn a wire error object back into the error kind it was raised as
    pub fn error_from_object(object: &ErrorObject, overrides: Option<&ErrorRegistry>) -> RpcError {
        RpcError::new(
            Self::resolve(object.code, overrides),
            Some(object.message.clone()),
            object.data.clone(),
        )
    }
}
