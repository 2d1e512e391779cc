//! # Prelude
//!
//! ```rust
//! use jsonrpc2_mq::prelude::*;
//! ```

pub use crate::client::{ClientVariant, IntoParams, RpcClient};
pub use crate::config::{EndpointConfig, SubscriptionConfig};
pub use crate::error::{ClientError, ClientResult, ServerError};
pub use crate::handler::{HandlerRegistry, NotificationHandlers, RequestContext};
pub use crate::server::{RpcServer, ServerVariant};
pub use crate::subscription::SubscriptionClient;
pub use crate::transport::{Context, SocketPattern};

pub use jsonrpc2_mq_protocol::prelude::*;
