//! JSON-RPC server: one task polling one bound socket

use bytes::Bytes;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use jsonrpc2_mq_protocol::{Decoded, Request, Response, RpcError, decode, encode};

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::{ServerError, TransportError};
use crate::handler::{HandlerRegistry, NotificationPusher, RequestContext};
use crate::shutdown::StopSignal;
use crate::transport::{Context, Interest, Multipart, Socket, SocketPattern};

/// Server flavours; each has a default pattern and an acceptance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVariant {
    /// REP: method calls only, one reply per call
    MethodsOnly,
    /// ROUTER: method calls and notifications, replies routed by identity
    MethodsAndNotifications,
    /// PULL: receives notifications, never replies
    NotificationsOnly,
}

impl ServerVariant {
    pub fn default_pattern(&self) -> SocketPattern {
        match self {
            ServerVariant::MethodsOnly => SocketPattern::Rep,
            ServerVariant::MethodsAndNotifications => SocketPattern::Router,
            ServerVariant::NotificationsOnly => SocketPattern::Pull,
        }
    }

    pub fn accepts_methods(&self) -> bool {
        !matches!(self, ServerVariant::NotificationsOnly)
    }

    pub fn accepts_notifications(&self) -> bool {
        !matches!(self, ServerVariant::MethodsOnly)
    }
}

/// Only a closed socket stops the loop; other receive failures are retried
fn ends_loop(error: &ServerError) -> bool {
    matches!(error, ServerError::Transport(TransportError::Closed))
}

/// What woke the loop
enum Wake {
    Stop,
    Push(Multipart),
    Readable(bool),
}

/// A bound JSON-RPC server.
///
/// Handlers run inline on the server task, one message at a time.
pub struct RpcServer {
    endpoint: Endpoint,
    socket: Socket,
    accepts_methods: bool,
    accepts_notifications: bool,
    handlers: HandlerRegistry,
    stop: StopSignal,
    pusher: NotificationPusher,
    outbound: mpsc::UnboundedReceiver<Multipart>,
}

impl RpcServer {
    /// Bind a server of the given variant. `config.timeout` is the poll
    /// interval at which the stop flag is checked.
    pub async fn bind(
        variant: ServerVariant,
        config: EndpointConfig,
        handlers: HandlerRegistry,
        context: Option<Context>,
    ) -> Result<Self, ServerError> {
        let mut endpoint = Endpoint::new(config, Some(variant.default_pattern()), context)?;
        endpoint.require("a server", false, true)?;
        let socket = endpoint.bind().await?;
        if let Some(resolved) = socket.last_endpoint() {
            endpoint.set_address(resolved);
        }

        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        Ok(Self {
            pusher: NotificationPusher::new(endpoint.pattern(), outbound_tx),
            endpoint,
            socket,
            accepts_methods: variant.accepts_methods(),
            accepts_notifications: variant.accepts_notifications(),
            handlers,
            stop: StopSignal::new(),
            outbound,
        })
    }

    /// The bound address, with any ephemeral port resolved
    pub fn endpoint(&self) -> &str {
        self.endpoint.address()
    }

    pub fn pattern(&self) -> SocketPattern {
        self.endpoint.pattern()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            endpoint: self.endpoint().to_string(),
            stop: self.stop.clone(),
            pusher: self.pusher.clone(),
        }
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> RunningServer {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        RunningServer { handle, task }
    }

    /// Serve until stopped
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(
            endpoint = self.endpoint(),
            pattern = %self.pattern(),
            "Server now listening"
        );
        while !self.stop.is_stopped() {
            match self.handle_one_message().await {
                Ok(()) => {}
                Err(e) if ends_loop(&e) => {
                    error!(endpoint = self.endpoint(), error = %e, "Server socket closed");
                    return Err(e);
                }
                Err(e) => {
                    error!(endpoint = self.endpoint(), error = %e, "Server failed to receive");
                    tokio::time::sleep(self.endpoint.timeout()).await;
                }
            }
        }
        info!(endpoint = self.endpoint(), "Server stopped");
        Ok(())
    }

    /// Wait up to one poll interval and handle at most one message.
    ///
    /// Queued pushes are sent first. Only transport failures on receive are
    /// returned; everything about the message itself is answered or logged.
    pub async fn handle_one_message(&mut self) -> Result<(), ServerError> {
        let timeout = self.endpoint.timeout();
        let wake = tokio::select! {
            biased;
            _ = self.stop.stopped() => Wake::Stop,
            Some(frames) = self.outbound.recv() => Wake::Push(frames),
            ready = self.socket.poll(Interest::Readable, timeout) => Wake::Readable(ready?),
        };

        match wake {
            Wake::Stop | Wake::Readable(false) => Ok(()),
            Wake::Push(frames) => {
                trace!(endpoint = self.endpoint(), "Server pushing notification");
                self.send(frames).await;
                Ok(())
            }
            Wake::Readable(true) => {
                let frames = self.socket.recv().await?;
                self.process(frames).await;
                Ok(())
            }
        }
    }

    async fn process(&mut self, frames: Multipart) {
        let (client_id, payload) = split_envelope(self.pattern(), frames);

        let request = match decode(&payload) {
            Ok(Decoded::Request(request)) => request,
            Ok(other) => {
                debug!(kind = other.kind_name(), "Server received a non-request");
                let response = Response::error(
                    other.correlation_id(),
                    RpcError::invalid_request(None).to_error_object(),
                );
                return self.respond(client_id, None, response).await;
            }
            Err(e) => {
                debug!(error = %e, "Server received unparseable message");
                let response = Response::error(None, RpcError::parse_error().to_error_object());
                return self.respond(client_id, None, response).await;
            }
        };

        debug!(
            kind = if request.is_notification() { "notification" } else { "method call" },
            method = %request.method,
            endpoint = self.endpoint(),
            params = ?request.params,
            "Server received"
        );

        let accepted = if request.is_notification() {
            self.accepts_notifications
        } else {
            self.accepts_methods
        };
        if !accepted {
            // Notifications are never answered, not even to reject them
            if request.is_method() && self.can_reply() {
                let error = RpcError::invalid_request(Some(
                    "Methods not accepted by this server".to_string(),
                ));
                let response = Response::error(request.id.clone(), error.to_error_object());
                self.respond(client_id, Some(&request), response).await;
            } else {
                trace!(method = %request.method, "Ignoring message this server does not accept");
            }
            return;
        }

        let outcome = self.dispatch(&request, client_id.clone()).await;

        let Some(id) = request.id.clone() else {
            if let Err(e) = outcome {
                debug!(method = %request.method, error = %e, "Notification handler failed");
            }
            return;
        };
        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => Response::error(Some(id), e.to_error_object()),
        };
        self.respond(client_id, Some(&request), response).await;
    }

    async fn dispatch(
        &self,
        request: &Request,
        client_id: Option<Multipart>,
    ) -> Result<Value, RpcError> {
        let Some(handler) = self.handlers.get(&request.method) else {
            return Err(RpcError::method_not_found(&request.method));
        };

        let ctx = RequestContext {
            client_id,
            endpoint: self.endpoint().to_string(),
            pusher: self.pusher.clone(),
        };

        let outcome = AssertUnwindSafe(handler.handle(request.params.clone(), ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => match err.downcast::<RpcError>() {
                Ok(rpc) => Err(rpc),
                Err(other) => {
                    error!(
                        method = %request.method,
                        error = %other,
                        "Exception handling message"
                    );
                    Err(RpcError::server_error(other.to_string()))
                }
            },
            Err(_) => {
                error!(method = %request.method, "Handler panicked");
                Err(RpcError::server_error(format!(
                    "Handler for '{}' panicked",
                    request.method
                )))
            }
        }
    }

    fn can_reply(&self) -> bool {
        self.pattern().can_send()
    }

    async fn respond(
        &mut self,
        client_id: Option<Multipart>,
        request: Option<&Request>,
        response: Response,
    ) {
        if request.is_some_and(Request::is_notification) {
            return;
        }
        if !self.can_reply() {
            trace!("Server pattern cannot reply, dropping response");
            return;
        }

        match response.error_object() {
            Some(error) => debug!(
                method = request.map(|r| r.method.as_str()),
                endpoint = self.endpoint(),
                code = error.code,
                message = %error.message,
                "Server sending error"
            ),
            None => debug!(
                method = request.map(|r| r.method.as_str()),
                endpoint = self.endpoint(),
                result = ?response.result(),
                "Server sending return"
            ),
        }

        let payload = match encode(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode response");
                return;
            }
        };
        let mut frames = client_id.unwrap_or_default();
        frames.push(Bytes::from(payload));
        self.send(frames).await;
    }

    async fn send(&mut self, frames: Multipart) {
        if let Err(e) = self.socket.send(frames).await {
            warn!(endpoint = self.endpoint(), error = %e, "Server failed to send");
        }
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("endpoint", &self.endpoint())
            .field("pattern", &self.pattern())
            .field("accepts_methods", &self.accepts_methods)
            .field("accepts_notifications", &self.accepts_notifications)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Split the routing envelope off a received message.
///
/// On routing patterns the leading identity frame, plus an empty delimiter
/// directly after it, is the envelope; the remaining frames joined together
/// are the payload.
fn split_envelope(pattern: SocketPattern, mut frames: Multipart) -> (Option<Multipart>, Vec<u8>) {
    if pattern.has_routing_envelope() && frames.len() > 1 {
        let mut envelope = vec![frames.remove(0)];
        if frames.len() > 1 && frames[0].is_empty() {
            envelope.push(frames.remove(0));
        }
        (Some(envelope), frames.concat())
    } else {
        (None, frames.concat())
    }
}

/// Controls a server from outside its task
#[derive(Debug, Clone)]
pub struct ServerHandle {
    endpoint: String,
    stop: StopSignal,
    pusher: NotificationPusher,
}

impl ServerHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the loop to exit; it does so within one poll interval
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn pusher(&self) -> &NotificationPusher {
        &self.pusher
    }
}

/// A server running on its own task
#[derive(Debug)]
pub struct RunningServer {
    handle: ServerHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    pub fn endpoint(&self) -> &str {
        self.handle.endpoint()
    }

    /// Stop the server and wait for its task to finish
    pub async fn stop(self) -> Result<(), ServerError> {
        self.handle.stop();
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpc2_mq_protocol::{ErrorKind, RequestParams, error_codes};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn handlers(notified: Arc<AtomicUsize>) -> HandlerRegistry {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register_fn("echo", |params, _ctx| async move {
                let (msg,): (Value,) = RequestParams::parse_optional(params.as_ref())?;
                Ok::<_, anyhow::Error>(msg)
            })
            .register_fn("fail", |_params, _ctx| async {
                Err::<Value, anyhow::Error>(anyhow::anyhow!("disk on fire"))
            })
            .register_fn("invalid", |_params, _ctx| async {
                Err::<Value, anyhow::Error>(RpcError::invalid_params(Some("needs a widget".into())).into())
            })
            .register_fn("event", move |_params, _ctx| {
                let notified = notified.clone();
                async move {
                    notified.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            });
        handlers
    }

    async fn server(
        ctx: &Context,
        variant: ServerVariant,
        name: &str,
    ) -> (RpcServer, Arc<AtomicUsize>) {
        let notified = Arc::new(AtomicUsize::new(0));
        let config = EndpointConfig::server(format!("inproc://{name}"))
            .with_timeout(Duration::from_millis(20));
        let server = RpcServer::bind(variant, config, handlers(notified.clone()), Some(ctx.clone()))
            .await
            .unwrap();
        (server, notified)
    }

    /// Send raw bytes from a DEALER and return the decoded reply, if any
    async fn exchange(
        server: &mut RpcServer,
        client: &mut Socket,
        payload: &'static [u8],
    ) -> Option<Value> {
        client
            .send(vec![Bytes::from_static(payload)])
            .await
            .unwrap();
        server.handle_one_message().await.unwrap();
        if client.poll(Interest::Readable, Duration::from_millis(50)).await.unwrap() {
            let mut frames = client.recv().await.unwrap();
            Some(serde_json::from_slice(&frames.pop().unwrap()).unwrap())
        } else {
            None
        }
    }

    async fn router_pair(name: &str) -> (RpcServer, Socket, Arc<AtomicUsize>) {
        let ctx = Context::new();
        let (server, notified) = server(&ctx, ServerVariant::MethodsAndNotifications, name).await;
        let mut dealer = ctx.socket(SocketPattern::Dealer);
        dealer.connect(server.endpoint()).await.unwrap();
        (server, dealer, notified)
    }

    #[tokio::test]
    async fn test_method_call_is_answered() {
        let (mut server, mut client, _) = router_pair("srv-echo").await;
        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "result": "hi", "id": 1}));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (mut server, mut client, _) = router_pair("srv-parse").await;
        let reply = exchange(&mut server, &mut client, b"{not json").await.unwrap();
        assert_eq!(reply["error"]["code"], error_codes::PARSE_ERROR);
        assert!(reply["id"].is_null());
    }

    #[tokio::test]
    async fn test_non_request_is_invalid() {
        let (mut server, mut client, _) = router_pair("srv-invalid").await;
        let reply = exchange(&mut server, &mut client, br#"[1, 2]"#).await.unwrap();
        assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","result":3,"id":"r"}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(reply["id"], "r");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut server, mut client, _) = router_pair("srv-unknown").await;
        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"nope","id":"x"}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(reply["id"], "x");
    }

    #[tokio::test]
    async fn test_handler_failures() {
        let (mut server, mut client, _) = router_pair("srv-fail").await;

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"fail","id":2}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::GENERIC_SERVER_ERROR);
        assert_eq!(reply["error"]["message"], "disk on fire");

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"invalid","id":3}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::INVALID_PARAMS);
        assert_eq!(reply["error"]["message"], "needs a widget");
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let (mut server, mut client, notified) = router_pair("srv-notify").await;

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"event","params":["fell over","quickly"]}"#,
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        // failures and unknown methods are silent too
        for payload in [
            br#"{"jsonrpc":"2.0","method":"fail"}"#.as_slice(),
            br#"{"jsonrpc":"2.0","method":"nope"}"#.as_slice(),
        ] {
            let reply = exchange(&mut server, &mut client, payload).await;
            assert!(reply.is_none());
        }
    }

    #[tokio::test]
    async fn test_methods_only_server_ignores_notifications() {
        let ctx = Context::new();
        let (mut server, notified) = server(&ctx, ServerVariant::MethodsOnly, "srv-rep").await;
        let mut client = ctx.socket(SocketPattern::Dealer);
        client.connect(server.endpoint()).await.unwrap();

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"event"}"#,
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        // the REP socket still answers the next call
        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"echo","params":[5],"id":9}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["result"], 5);
    }

    #[tokio::test]
    async fn test_rejected_method_on_routing_server() {
        let ctx = Context::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let config = EndpointConfig::server("inproc://srv-reject")
            .with_pattern(SocketPattern::Router)
            .with_timeout(Duration::from_millis(20));
        let mut server = RpcServer::bind(
            ServerVariant::NotificationsOnly,
            config,
            handlers(notified),
            Some(ctx.clone()),
        )
        .await
        .unwrap();
        let mut client = ctx.socket(SocketPattern::Dealer);
        client.connect(server.endpoint()).await.unwrap();

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":1}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(reply["error"]["message"], "Methods not accepted by this server");
    }

    #[tokio::test]
    async fn test_pull_server_ignores_method_calls() {
        let ctx = Context::new();
        let (mut server, notified) =
            server(&ctx, ServerVariant::NotificationsOnly, "srv-pull").await;
        let mut push = ctx.socket(SocketPattern::Push);
        push.connect(server.endpoint()).await.unwrap();

        push.send(vec![Bytes::from_static(
            br#"{"jsonrpc":"2.0","method":"event","params":[1]}"#,
        )])
        .await
        .unwrap();
        push.send(vec![Bytes::from_static(
            br#"{"jsonrpc":"2.0","method":"event","id":1}"#,
        )])
        .await
        .unwrap();
        server.handle_one_message().await.unwrap();
        server.handle_one_message().await.unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_can_push_to_caller() {
        let ctx = Context::new();
        let mut handlers = HandlerRegistry::new();
        handlers.register_fn("subscribe", |_params, ctx: RequestContext| async move {
            ctx.notify("event", Some(RequestParams::positional([json!(0)])))?;
            Ok::<_, anyhow::Error>(Value::Null)
        });
        let config = EndpointConfig::server("inproc://srv-push").with_timeout(Duration::from_millis(20));
        let mut server = RpcServer::bind(
            ServerVariant::MethodsAndNotifications,
            config,
            handlers,
            Some(ctx.clone()),
        )
        .await
        .unwrap();
        let mut client = ctx.socket(SocketPattern::Dealer);
        client.connect(server.endpoint()).await.unwrap();

        let reply = exchange(
            &mut server,
            &mut client,
            br#"{"jsonrpc":"2.0","method":"subscribe","id":"s"}"#,
        )
        .await
        .unwrap();
        assert!(reply["result"].is_null());

        server.handle_one_message().await.unwrap();
        assert!(client.poll(Interest::Readable, WAIT).await.unwrap());
        let mut frames = client.recv().await.unwrap();
        let pushed: Value = serde_json::from_slice(&frames.pop().unwrap()).unwrap();
        assert_eq!(pushed["method"], "event");
        assert!(pushed.get("id").is_none());
    }

    #[tokio::test]
    async fn test_spawned_server_stops() {
        let ctx = Context::new();
        let (server, _) = server(&ctx, ServerVariant::MethodsOnly, "srv-stop").await;
        let running = server.spawn();
        assert!(!running.handle().is_stopped());

        tokio::time::timeout(WAIT, running.stop())
            .await
            .expect("server should stop within one poll interval")
            .unwrap();
    }

    #[test]
    fn test_split_envelope() {
        let frames = vec![
            Bytes::from_static(b"id"),
            Bytes::new(),
            Bytes::from_static(b"{\"a\":"),
            Bytes::from_static(b"1}"),
        ];
        let (envelope, payload) = split_envelope(SocketPattern::Router, frames.clone());
        assert_eq!(envelope.unwrap().len(), 2);
        assert_eq!(payload, b"{\"a\":1}");

        let (envelope, payload) = split_envelope(SocketPattern::Pull, vec![frames[3].clone()]);
        assert!(envelope.is_none());
        assert_eq!(payload, b"1}");
    }

    #[test]
    fn test_variant_policy() {
        assert!(ServerVariant::MethodsOnly.accepts_methods());
        assert!(!ServerVariant::MethodsOnly.accepts_notifications());
        assert!(!ServerVariant::NotificationsOnly.accepts_methods());
        assert_eq!(
            ServerVariant::MethodsAndNotifications.default_pattern(),
            SocketPattern::Router
        );
        assert_eq!(ErrorKind::InvalidRequest.code(), error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_only_a_closed_socket_ends_the_loop() {
        assert!(ends_loop(&ServerError::Transport(TransportError::Closed)));
        assert!(!ends_loop(&ServerError::Transport(TransportError::InvalidState(
            "recv while replying"
        ))));
        assert!(!ends_loop(&ServerError::Transport(TransportError::Protocol(
            "bad frame".into()
        ))));
    }
}
