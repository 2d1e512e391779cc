//! # JSON-RPC Protocol Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use jsonrpc2_mq_protocol::prelude::*;
//! ```

pub use crate::codec::{CodecError, Decoded, UtcSeconds, decode, encode};
pub use crate::error::{ErrorKind, ErrorObject, RegisteredKind, RpcError};
pub use crate::registry::ErrorRegistry;
pub use crate::request::{Request, RequestParams};
pub use crate::response::{Outcome, Response};
pub use crate::types::{JsonRpcVersion, RequestId};

// Standard error codes
pub use crate::error_codes::*;
