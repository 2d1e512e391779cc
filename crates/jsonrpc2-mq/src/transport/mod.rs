//! Message-queue sockets
//!
//! Sockets follow the classic message-queue patterns (REQ/REP, DEALER/ROUTER,
//! PUSH/PULL, PAIR) and exchange multipart messages. Two address schemes are
//! supported:
//!
//! - `inproc://<name>` connects sockets created from the same [`Context`]
//! - `tcp://<host>:<port>` carries length-prefixed multipart frames over TCP

mod codec;
mod context;
mod peer;
mod pattern;
mod socket;
mod tcp;

use bytes::Bytes;

use crate::error::TransportError;

pub use codec::{MAX_MESSAGE_SIZE, MultipartCodec};
pub use context::Context;
pub use pattern::SocketPattern;
pub use socket::Socket;

/// One message: an ordered list of frames delivered atomically
pub type Multipart = Vec<Bytes>;

/// What [`Socket::poll`] waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// A parsed endpoint address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Inproc(String),
    /// `host:port`, ready for the socket APIs
    Tcp(String),
}

impl Address {
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidAddress(address.to_string());

        if let Some(name) = address.strip_prefix("inproc://") {
            if name.is_empty() {
                return Err(invalid());
            }
            return Ok(Address::Inproc(name.to_string()));
        }

        if let Some(rest) = address.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid());
            }
            // `*` binds every interface
            let host = if host == "*" { "0.0.0.0" } else { host };
            return Ok(Address::Tcp(format!("{host}:{port}")));
        }

        Err(invalid())
    }
}
