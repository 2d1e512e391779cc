use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use jsonrpc2_mq_protocol::{Request, RequestParams, encode};

use crate::error::PushError;
use crate::transport::{Multipart, SocketPattern};

/// Handles calls to (and notifications of) one method on a server.
///
/// Returning an [`jsonrpc2_mq_protocol::RpcError`] sends that error back
/// unchanged; any other error becomes a generic server error carrying its
/// description.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> anyhow::Result<Value>;
}

/// A closure-based method handler
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<RequestParams>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(
        &self,
        params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> anyhow::Result<Value> {
        (self.f)(params, ctx).await
    }
}

/// Method name → handler, built by the server owner
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: MethodHandler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    pub fn register_fn<F, Fut>(&mut self, method: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Option<RequestParams>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(method, FnHandler::new(f))
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

/// What a handler knows about the message it is handling
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Routing envelope of the caller; `None` on patterns without one
    pub client_id: Option<Multipart>,
    /// Address the server is bound to
    pub endpoint: String,
    pub pusher: NotificationPusher,
}

impl RequestContext {
    /// Push a notification to the caller of this request
    pub fn notify(
        &self,
        method: impl Into<String>,
        params: Option<RequestParams>,
    ) -> Result<(), PushError> {
        let client_id = self.client_id.as_ref().ok_or(PushError::NoClient)?;
        self.pusher.push(client_id, method, params)
    }
}

/// Queues notifications for a server to send to individual clients.
///
/// Cloneable and usable from any task; the server sends queued messages
/// between polls.
#[derive(Debug, Clone)]
pub struct NotificationPusher {
    pattern: SocketPattern,
    outbound: mpsc::UnboundedSender<Multipart>,
}

impl NotificationPusher {
    pub(crate) fn new(pattern: SocketPattern, outbound: mpsc::UnboundedSender<Multipart>) -> Self {
        Self { pattern, outbound }
    }

    pub fn push(
        &self,
        client_id: &[Bytes],
        method: impl Into<String>,
        params: Option<RequestParams>,
    ) -> Result<(), PushError> {
        if !self.pattern.has_routing_envelope() {
            return Err(PushError::NotRoutable(self.pattern));
        }
        if client_id.is_empty() {
            return Err(PushError::NoClient);
        }

        let notification = Request::notification(method, params);
        let mut frames = client_id.to_vec();
        frames.push(Bytes::from(encode(&notification)?));
        self.outbound
            .send(frames)
            .map_err(|_| PushError::ServerStopped)
    }
}

/// Handles notifications a subscription client receives from its server
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<RequestParams>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for FnHandler<F>
where
    F: Fn(Option<RequestParams>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, params: Option<RequestParams>) -> anyhow::Result<()> {
        (self.f)(params).await
    }
}

/// Notification name → handler for a subscription client
#[derive(Clone, Default)]
pub struct NotificationHandlers {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl NotificationHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: NotificationHandler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    pub fn on_fn<F, Fut>(self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<RequestParams>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on(method, FnHandler::new(f))
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for NotificationHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("NotificationHandlers")
            .field("methods", &names)
            .finish()
    }
}
