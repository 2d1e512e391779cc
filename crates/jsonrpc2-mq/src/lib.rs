//! # JSON-RPC 2.0 over message-queue sockets
//!
//! Clients, servers and a subscription bridge that speak JSON-RPC 2.0 over
//! message-queue socket patterns, in-process or over TCP.
//!
//! ## Features
//!
//! - **Clients**: lockstep (REQ), multiplexed (DEALER) and push-only (PUSH)
//! - **Servers**: methods only (REP), methods and notifications (ROUTER),
//!   notifications only (PULL)
//! - **Subscriptions**: a background worker that handles server pushes while
//!   still routing replies to calls
//! - **Timeouts**: every wait is bounded; a timed-out client reconnects
//!
//! ## Wire compatibility
//!
//! `tcp://` endpoints use this crate's own framing: a `JRMQ/1` greeting
//! carrying the socket pattern, then length-prefixed multipart frames. It is
//! not ZMTP, so these sockets only talk to other `jsonrpc2-mq` peers and
//! cannot connect to ZeroMQ sockets or servers built on libzmq.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jsonrpc2_mq::prelude::*;
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut handlers = HandlerRegistry::new();
//!     handlers.register_fn("echo", |params, _ctx| async move {
//!         let (msg,): (Value,) = RequestParams::parse_optional(params.as_ref())?;
//!         Ok::<_, anyhow::Error>(msg)
//!     });
//!
//!     let server = RpcServer::bind(
//!         ServerVariant::MethodsOnly,
//!         EndpointConfig::server("inproc://echo"),
//!         handlers,
//!         None,
//!     )
//!     .await?
//!     .spawn();
//!
//!     let mut client = RpcClient::connect(
//!         ClientVariant::Lockstep,
//!         EndpointConfig::new("inproc://echo"),
//!         None,
//!     )
//!     .await?;
//!     assert_eq!(client.call("echo", vec![json!("hi")]).await?, json!("hi"));
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod link;
pub mod server;
pub mod shutdown;
pub mod subscription;
pub mod transport;

pub mod prelude;

// Re-export main types
pub use client::{ClientVariant, IntoParams, MethodProxy, NotifierProxy, RpcClient};
pub use config::{EndpointConfig, SubscriptionConfig};
pub use endpoint::Endpoint;
pub use error::{
    ClientError, ClientResult, ConfigError, PushError, ServerError, TimeoutPhase, TransportError,
};
pub use handler::{
    FnHandler, HandlerRegistry, MethodHandler, NotificationHandler, NotificationHandlers,
    NotificationPusher, RequestContext,
};
pub use link::{BoxedLink, RequestLink, SocketLink};
pub use server::{RpcServer, RunningServer, ServerHandle, ServerVariant};
pub use shutdown::StopSignal;
pub use subscription::SubscriptionClient;
pub use transport::{Address, Context, Interest, Multipart, Socket, SocketPattern};

// Re-export the message model for convenience
pub use jsonrpc2_mq_protocol as protocol;
