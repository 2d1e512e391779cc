//! JSON-RPC client over a request link

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use jsonrpc2_mq_protocol::{
    Decoded, ErrorRegistry, Outcome, Request, RequestParams, decode, encode,
};

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientResult, TimeoutPhase};
use crate::link::{BoxedLink, SocketLink};
use crate::transport::{Context, SocketPattern};

/// Client flavours; they differ only in the socket pattern used by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVariant {
    /// REQ: strict call/reply alternation
    Lockstep,
    /// DEALER: talks to routing servers, which may also push notifications
    Multiplexed,
    /// PUSH: sends only, never waits for a reply
    PushOnly,
}

impl ClientVariant {
    pub fn default_pattern(&self) -> SocketPattern {
        match self {
            ClientVariant::Lockstep => SocketPattern::Req,
            ClientVariant::Multiplexed => SocketPattern::Dealer,
            ClientVariant::PushOnly => SocketPattern::Push,
        }
    }
}

/// Conversion into optional request parameters
pub trait IntoParams {
    fn into_params(self) -> Option<RequestParams>;
}

impl IntoParams for () {
    fn into_params(self) -> Option<RequestParams> {
        None
    }
}

impl IntoParams for RequestParams {
    fn into_params(self) -> Option<RequestParams> {
        Some(self)
    }
}

impl IntoParams for Option<RequestParams> {
    fn into_params(self) -> Option<RequestParams> {
        self
    }
}

impl IntoParams for Vec<Value> {
    fn into_params(self) -> Option<RequestParams> {
        Some(RequestParams::Array(self))
    }
}

impl IntoParams for Map<String, Value> {
    fn into_params(self) -> Option<RequestParams> {
        Some(RequestParams::Object(self))
    }
}

/// JSON-RPC client.
///
/// Calls take `&mut self`, so a client has at most one request in flight.
pub struct RpcClient {
    link: BoxedLink,
    timeout: Duration,
    overrides: Option<Arc<ErrorRegistry>>,
}

impl RpcClient {
    /// Connect a client of the given variant. Without a `context` the
    /// process-wide one is used.
    pub async fn connect(
        variant: ClientVariant,
        config: EndpointConfig,
        context: Option<Context>,
    ) -> ClientResult<Self> {
        let endpoint = Endpoint::new(config, Some(variant.default_pattern()), context)?;
        Self::connect_endpoint(endpoint).await
    }

    pub async fn connect_endpoint(endpoint: Endpoint) -> ClientResult<Self> {
        endpoint.require("a client", true, false)?;
        let timeout = endpoint.timeout();
        debug!(
            endpoint = endpoint.address(),
            pattern = %endpoint.pattern(),
            "Connecting client"
        );
        let link = SocketLink::connect(endpoint).await?;
        Ok(Self::with_link(Box::new(link), timeout))
    }

    pub fn with_link(link: BoxedLink, timeout: Duration) -> Self {
        Self {
            link,
            timeout,
            overrides: None,
        }
    }

    /// Error kinds consulted before the global registry when rebuilding errors
    pub fn with_error_overrides(mut self, overrides: Arc<ErrorRegistry>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn endpoint(&self) -> &str {
        self.link.endpoint()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bound for each later wait to send or to receive
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and, for method calls, wait for its result.
    ///
    /// Notifications, and any request on a link without a reply path,
    /// return `Value::Null` as soon as they are sent.
    pub async fn request(&mut self, request: &Request) -> ClientResult<Value> {
        let payload = Bytes::from(encode(request)?);
        debug!(
            method = %request.method,
            endpoint = self.link.endpoint(),
            params = ?request.params,
            "Client calling"
        );

        if !self.link.writable(self.timeout).await? {
            return Err(self.timed_out(&request.method, TimeoutPhase::Send).await);
        }
        self.link.send(payload).await?;

        if request.is_notification() || !self.link.expects_replies() {
            return Ok(Value::Null);
        }

        debug!(
            method = %request.method,
            endpoint = self.link.endpoint(),
            "Client waiting for response"
        );
        if !self.link.readable(self.timeout).await? {
            return Err(self.timed_out(&request.method, TimeoutPhase::Reply).await);
        }
        let reply = self.link.recv().await?;
        let result = self.interpret(request, &reply)?;

        debug!(
            method = %request.method,
            endpoint = self.link.endpoint(),
            result = %result,
            "Client received"
        );
        Ok(result)
    }

    /// Call `method` and return its result
    pub async fn call(&mut self, method: &str, params: impl IntoParams) -> ClientResult<Value> {
        self.request(&Request::new(method, params.into_params()))
            .await
    }

    /// Call `method` and deserialize its result
    pub async fn call_as<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: impl IntoParams,
    ) -> ClientResult<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(ClientError::Result)
    }

    /// Send `method` as a notification
    pub async fn notify(&mut self, method: &str, params: impl IntoParams) -> ClientResult<()> {
        self.request(&Request::notification(method, params.into_params()))
            .await
            .map(|_| ())
    }

    /// A callable bound to one method name
    pub fn method(&mut self, name: impl Into<String>) -> MethodProxy<'_> {
        MethodProxy {
            client: self,
            method: name.into(),
            notify: false,
        }
    }

    /// Proxies from this view send notifications
    pub fn notifier(&mut self) -> NotifierProxy<'_> {
        NotifierProxy { client: self }
    }

    async fn timed_out(&mut self, method: &str, phase: TimeoutPhase) -> ClientError {
        warn!(
            method,
            endpoint = self.link.endpoint(),
            %phase,
            "Request timed out, recreating socket"
        );
        if let Err(e) = self.link.reset().await {
            warn!(error = %e, "Failed to recreate socket after timeout");
        }
        ClientError::Timeout {
            method: method.to_string(),
            endpoint: self.link.endpoint().to_string(),
            phase,
        }
    }

    fn interpret(&self, request: &Request, reply: &[u8]) -> ClientResult<Value> {
        let decoded = decode(reply)?;

        let actual = decoded.correlation_id();
        if actual.as_ref() != request.id.as_ref() {
            return Err(ClientError::OutOfOrderResponse {
                expected: request.id.clone(),
                actual,
            });
        }

        let response = match decoded {
            Decoded::Response(response) => response,
            other => return Err(ClientError::NonResponse(other.kind_name())),
        };

        match response.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => {
                Err(ErrorRegistry::error_from_object(&error, self.overrides.as_deref()).into())
            }
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.link.endpoint())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Calls one method on a client
pub struct MethodProxy<'a> {
    client: &'a mut RpcClient,
    method: String,
    notify: bool,
}

impl MethodProxy<'_> {
    pub fn name(&self) -> &str {
        &self.method
    }

    /// Invoke with positional or named arguments, not both. With neither,
    /// an empty named set is sent.
    pub async fn invoke(
        self,
        positional: Vec<Value>,
        named: Map<String, Value>,
    ) -> ClientResult<Value> {
        let params = match (positional.is_empty(), named.is_empty()) {
            (false, false) => return Err(ClientError::MixedArguments),
            (false, true) => RequestParams::Array(positional),
            (true, _) => RequestParams::Object(named),
        };
        self.call(params).await
    }

    pub async fn call(self, params: impl IntoParams) -> ClientResult<Value> {
        let params = params.into_params();
        let request = if self.notify {
            Request::notification(self.method, params)
        } else {
            Request::new(self.method, params)
        };
        self.client.request(&request).await
    }
}

/// Builds proxies that send notifications instead of method calls
pub struct NotifierProxy<'a> {
    client: &'a mut RpcClient,
}

impl<'a> NotifierProxy<'a> {
    pub fn method(self, name: impl Into<String>) -> MethodProxy<'a> {
        MethodProxy {
            client: self.client,
            method: name.into(),
            notify: true,
        }
    }
}
