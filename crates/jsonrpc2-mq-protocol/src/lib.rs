//! # JSON-RPC 2.0 message model for message-queue transports
//!
//! Transport-agnostic core types shared by every client and server in the
//! workspace: requests, notifications and responses, the shape-based wire
//! codec, and the error taxonomy with its code registry.
//!
//! ## Features
//! - Requests carry an explicit, generated or absent id (absent ⇒ notification)
//! - Responses carry exactly one of `result` / `error`
//! - Decoding reconstructs messages from their JSON shape, not from tags
//! - Date/time values travel as UTC ISO-8601 truncated to whole seconds
//! - Application error kinds are registered by code, first registration wins

pub mod codec;
pub mod error;
pub mod registry;
pub mod request;
pub mod response;
pub mod types;

pub mod prelude;

// Re-export main types
pub use codec::{CodecError, Decoded, UtcSeconds, decode, encode};
pub use error::{ErrorKind, ErrorObject, RegisteredKind, RpcError};
pub use registry::{ErrorRegistry, RegistrationError};
pub use request::{Request, RequestParams};
pub use response::{Outcome, Response};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// Code used for server faults that carry no code of their own
    pub const GENERIC_SERVER_ERROR: i64 = SERVER_ERROR_END;

    /// The five codes no application kind may claim
    pub const RESERVED: [i64; 5] = [
        PARSE_ERROR,
        INVALID_REQUEST,
        METHOD_NOT_FOUND,
        INVALID_PARAMS,
        INTERNAL_ERROR,
    ];

    pub fn is_reserved(code: i64) -> bool {
        RESERVED.contains(&code)
    }

    pub fn is_server_error(code: i64) -> bool {
        (SERVER_ERROR_START..=SERVER_ERROR_END).contains(&code)
    }
}
