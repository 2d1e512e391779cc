//! Error types for clients, servers and the transport

use thiserror::Error;

use jsonrpc2_mq_protocol::{CodecError, RequestId, RpcError};

use crate::transport::SocketPattern;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Which wait of a call ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for the socket to accept the request
    Send,
    /// Waiting for the reply
    Reply,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Send => write!(f, "waiting to call"),
            TimeoutPhase::Reply => write!(f, "getting response to"),
        }
    }
}

/// Error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// The call did not complete in time; the socket has been recreated.
    /// Never sent over the wire.
    #[error("Timed out while {phase} {method} on {endpoint}")]
    Timeout {
        method: String,
        endpoint: String,
        phase: TimeoutPhase,
    },

    /// The reply carried an id other than the one that was sent
    #[error(
        "Received out-of-order response: expected id {}, got {}",
        display_id(.expected),
        display_id(.actual)
    )]
    OutOfOrderResponse {
        expected: Option<RequestId>,
        actual: Option<RequestId>,
    },

    /// The reply was valid JSON but not a response
    #[error("Received a non-response ({0})")]
    NonResponse(&'static str),

    /// The server answered with an error
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Cannot be called with both positional and named arguments")]
    MixedArguments,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The subscription worker has exited and can no longer carry calls
    #[error("Subscription worker stopped")]
    WorkerStopped,

    #[error("Failed to deserialize result: {0}")]
    Result(#[source] serde_json::Error),
}

fn display_id(id: &Option<RequestId>) -> String {
    id.as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string())
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The JSON-RPC error returned by the server, if that is what this is
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid address '{0}': expected inproc://<name> or tcp://<host>:<port>")]
    InvalidAddress(String),

    #[error("Address already in use: {0}")]
    AddressInUse(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Incompatible socket patterns: {local} cannot talk to {remote}")]
    IncompatiblePattern {
        local: SocketPattern,
        remote: SocketPattern,
    },

    #[error("{pattern} socket cannot {operation}")]
    Unsupported {
        pattern: SocketPattern,
        operation: &'static str,
    },

    #[error("Invalid socket state: {0}")]
    InvalidState(&'static str),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Socket closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Endpoint configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Socket pattern invalid: no pattern configured and no default for this endpoint")]
    MissingPattern,

    #[error("Socket pattern {pattern} cannot be used by {role}")]
    UnsuitablePattern {
        pattern: SocketPattern,
        role: &'static str,
    },
}

/// Errors from setting up or running a server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from pushing a notification to a server's client
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Server pattern {0} cannot push to an individual client")]
    NotRoutable(SocketPattern),

    #[error("Request has no client identity to push to")]
    NoClient,

    #[error("Server has stopped")]
    ServerStopped,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}
