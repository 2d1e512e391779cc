//! Subscription client: calls go through a background worker that owns the
//! real socket, so notifications pushed by the server are handled while the
//! caller is idle.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jsonrpc2_mq_protocol::{Decoded, Request, RequestId, decode};

use crate::client::{IntoParams, RpcClient};
use crate::config::SubscriptionConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientResult};
use crate::handler::NotificationHandlers;
use crate::link::{BridgeCommand, BridgeLink, payload_of};
use crate::shutdown::StopSignal;
use crate::transport::{Context, Interest, Socket, SocketPattern};

const COMMAND_BUFFER: usize = 16;

/// A client whose server can push notifications back to it.
///
/// Calls made through [`SubscriptionClient::client`] are forwarded to the
/// worker, which sends them and hands back the reply whose id matches.
/// Anything else arriving with no id is dispatched to the notification
/// handlers. Dropping the client stops the worker.
pub struct SubscriptionClient {
    client: RpcClient,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl SubscriptionClient {
    /// Connect to `config.endpoint` (DEALER unless configured otherwise) and
    /// start the worker. Without a `context` the process-wide one is used.
    pub async fn connect(
        config: SubscriptionConfig,
        handlers: NotificationHandlers,
        context: Option<Context>,
    ) -> ClientResult<Self> {
        let endpoint = Endpoint::new(config.endpoint, Some(SocketPattern::Dealer), context)?;
        endpoint.require("a subscription", true, true)?;
        let socket = endpoint.connect().await?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let stop = StopSignal::new();

        let link = BridgeLink::new(
            endpoint.address(),
            endpoint.pattern().can_recv(),
            commands_tx,
        );
        let client = RpcClient::with_link(Box::new(link), endpoint.timeout());

        let worker = Worker {
            endpoint,
            socket,
            commands,
            awaiting: None,
            handlers,
            stop: stop.clone(),
            poll_interval: config.poll_interval,
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            client,
            stop,
            worker: Some(worker),
        })
    }

    /// The client that talks through the worker
    pub fn client(&mut self) -> &mut RpcClient {
        &mut self.client
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub async fn call(
        &mut self,
        method: &str,
        params: impl IntoParams,
    ) -> ClientResult<serde_json::Value> {
        self.client.call(method, params).await
    }

    pub async fn notify(&mut self, method: &str, params: impl IntoParams) -> ClientResult<()> {
        self.client.notify(method, params).await
    }

    /// A signal that stops the worker when triggered from elsewhere
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Wait until the worker exits, which happens once stop is requested
    pub async fn wait_for_notifications(&mut self) -> ClientResult<()> {
        match self.worker.take() {
            Some(worker) => worker.await.map_err(|e| {
                error!(error = %e, "Subscription worker failed");
                ClientError::WorkerStopped
            }),
            None => Ok(()),
        }
    }

    /// Stop the worker and wait for it to release its socket
    pub async fn stop(&mut self) -> ClientResult<()> {
        self.stop.stop();
        self.wait_for_notifications().await
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("endpoint", &self.endpoint())
            .field("running", &self.is_running())
            .finish()
    }
}

enum Wake {
    Stop,
    Command(BridgeCommand),
    Readable(bool),
}

struct Worker {
    endpoint: Endpoint,
    socket: Socket,
    commands: mpsc::Receiver<BridgeCommand>,
    awaiting: Option<(RequestId, oneshot::Sender<Bytes>)>,
    handlers: NotificationHandlers,
    stop: StopSignal,
    poll_interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        info!(
            endpoint = self.endpoint.address(),
            handlers = ?self.handlers,
            "Subscription worker started"
        );

        while !self.stop.is_stopped() {
            let wake = tokio::select! {
                biased;
                _ = self.stop.stopped() => Wake::Stop,
                Some(command) = self.commands.recv() => Wake::Command(command),
                ready = self.socket.poll(Interest::Readable, self.poll_interval) => match ready {
                    Ok(ready) => Wake::Readable(ready),
                    Err(e) => {
                        error!(endpoint = self.endpoint.address(), error = %e, "Subscription socket failed");
                        Wake::Stop
                    }
                },
            };

            match wake {
                Wake::Stop => break,
                Wake::Command(BridgeCommand::Forward { payload, reply }) => {
                    self.forward(payload, reply).await
                }
                Wake::Command(BridgeCommand::Reconnect { done }) => {
                    self.reconnect().await;
                    let _ = done.send(());
                }
                Wake::Readable(true) => self.receive().await,
                Wake::Readable(false) => {}
            }
        }

        info!(endpoint = self.endpoint.address(), "Subscription worker stopped");
    }

    async fn forward(&mut self, payload: Bytes, reply: oneshot::Sender<Bytes>) {
        // Only calls wait for a reply; a notification's sender is dropped here
        self.awaiting = match decode(&payload) {
            Ok(Decoded::Request(Request { id: Some(id), .. })) => Some((id, reply)),
            _ => None,
        };

        let timeout = self.endpoint.timeout();
        match self.socket.poll(Interest::Writable, timeout).await {
            Ok(true) => {
                if let Err(e) = self.socket.send(vec![payload]).await {
                    warn!(endpoint = self.endpoint.address(), error = %e, "Subscription failed to send");
                }
            }
            // the caller times out waiting for the reply and asks for a reconnect
            Ok(false) => warn!(endpoint = self.endpoint.address(), "Subscription socket not writable"),
            Err(e) => warn!(endpoint = self.endpoint.address(), error = %e, "Subscription failed to send"),
        }
    }

    async fn reconnect(&mut self) {
        self.awaiting = None;
        match self.endpoint.connect().await {
            Ok(socket) => {
                debug!(endpoint = self.endpoint.address(), "Subscription socket recreated");
                self.socket = socket;
            }
            Err(e) => warn!(
                endpoint = self.endpoint.address(),
                error = %e,
                "Subscription failed to reconnect"
            ),
        }
    }

    async fn receive(&mut self) {
        let frames = match self.socket.recv().await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(endpoint = self.endpoint.address(), error = %e, "Subscription failed to receive");
                return;
            }
        };
        let payload = match payload_of(frames) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };
        let decoded = match decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                return;
            }
        };

        match decoded.id() {
            Some(id) => {
                if self.awaiting.as_ref().is_some_and(|(awaited, _)| awaited == id) {
                    if let Some((_, reply)) = self.awaiting.take() {
                        let _ = reply.send(payload);
                    }
                } else {
                    warn!(id = %id, "Dropping message nobody is waiting for");
                }
            }
            None => match decoded {
                Decoded::Request(request) => self.dispatch(request).await,
                other => warn!(kind = other.kind_name(), "Dropping message without an id"),
            },
        }
    }

    async fn dispatch(&self, notification: Request) {
        debug!(
            method = %notification.method,
            params = ?notification.params,
            "Subscription received notification"
        );
        let Some(handler) = self.handlers.get(&notification.method) else {
            warn!(method = %notification.method, "No handler for notification");
            return;
        };
        if let Err(e) = handler.handle(notification.params).await {
            error!(method = %notification.method, error = %e, "Notification handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::handler::{HandlerRegistry, RequestContext};
    use crate::server::{RpcServer, ServerVariant};
    use jsonrpc2_mq_protocol::RequestParams;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handlers() -> (NotificationHandlers, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handlers = NotificationHandlers::new().on_fn("event", move |_params| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        });
        (handlers, seen)
    }

    async fn push_server(ctx: &Context, name: &str) -> crate::server::RunningServer {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register_fn("echo", |params, _ctx| async move {
                let (msg,): (Value,) = RequestParams::parse_optional(params.as_ref())?;
                Ok::<_, anyhow::Error>(msg)
            })
            .register_fn("subscribe", |_params, ctx: RequestContext| async move {
                ctx.notify("event", Some(RequestParams::positional([json!(1)])))?;
                ctx.notify("unhandled", None)?;
                ctx.notify("event", Some(RequestParams::positional([json!(2)])))?;
                Ok::<_, anyhow::Error>(json!("subscribed"))
            });
        let config = EndpointConfig::server(format!("inproc://{name}"))
            .with_timeout(Duration::from_millis(20));
        RpcServer::bind(
            ServerVariant::MethodsAndNotifications,
            config,
            handlers,
            Some(ctx.clone()),
        )
        .await
        .unwrap()
        .spawn()
    }

    fn subscription_config(name: &str) -> SubscriptionConfig {
        SubscriptionConfig::new(format!("inproc://{name}"))
            .with_timeout(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(20))
    }

    async fn wait_for_count(seen: &AtomicUsize, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < expected && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_calls_pass_through_worker() {
        let ctx = Context::new();
        let server = push_server(&ctx, "sub-echo").await;
        let (handlers, _) = counting_handlers();
        let mut subscription =
            SubscriptionClient::connect(subscription_config("sub-echo"), handlers, Some(ctx))
                .await
                .unwrap();

        assert!(subscription.is_running());
        let result = subscription.call("echo", vec![json!("hi")]).await.unwrap();
        assert_eq!(result, json!("hi"));

        subscription.stop().await.unwrap();
        assert!(!subscription.is_running());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pushed_notifications_reach_handlers() {
        let ctx = Context::new();
        let server = push_server(&ctx, "sub-push").await;
        let (handlers, seen) = counting_handlers();
        let mut subscription =
            SubscriptionClient::connect(subscription_config("sub-push"), handlers, Some(ctx))
                .await
                .unwrap();

        let result = subscription.call("subscribe", ()).await.unwrap();
        assert_eq!(result, json!("subscribed"));

        // "unhandled" has no handler and is dropped without disturbing the rest
        wait_for_count(&seen, 2).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        // the worker still answers calls afterwards
        let result = subscription.call("echo", vec![json!(3)]).await.unwrap();
        assert_eq!(result, json!(3));

        subscription.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_from_another_task() {
        let ctx = Context::new();
        let server = push_server(&ctx, "sub-stop").await;
        let (handlers, _) = counting_handlers();
        let mut subscription =
            SubscriptionClient::connect(subscription_config("sub-stop"), handlers, Some(ctx))
                .await
                .unwrap();

        let stop = subscription.stop_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.stop();
        });
        tokio::time::timeout(Duration::from_secs(2), subscription.wait_for_notifications())
            .await
            .expect("worker should exit after stop")
            .unwrap();

        // calls fail once the worker is gone
        assert!(matches!(
            subscription.call("echo", vec![json!(1)]).await,
            Err(ClientError::WorkerStopped)
        ));
        server.stop().await.unwrap();
    }

    /// A bare ROUTER standing in for the server, so replies can be forged
    async fn router_and_worker(
        name: &str,
    ) -> (Socket, mpsc::Sender<BridgeCommand>, StopSignal, JoinHandle<()>) {
        let ctx = Context::new();
        let address = format!("inproc://{name}");
        let mut router = ctx.socket(SocketPattern::Router);
        router.bind(&address).await.unwrap();

        let config = EndpointConfig::new(&address).with_timeout(Duration::from_millis(500));
        let endpoint = Endpoint::new(config, Some(SocketPattern::Dealer), Some(ctx)).unwrap();
        let socket = endpoint.connect().await.unwrap();
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let stop = StopSignal::new();
        let worker = Worker {
            endpoint,
            socket,
            commands,
            awaiting: None,
            handlers: NotificationHandlers::new(),
            stop: stop.clone(),
            poll_interval: Duration::from_millis(20),
        };
        (router, commands_tx, stop, tokio::spawn(worker.run()))
    }

    async fn forward(commands: &mpsc::Sender<BridgeCommand>, id: u64) -> oneshot::Receiver<Bytes> {
        let (reply, awaiting) = oneshot::channel();
        let payload = format!(r#"{{"jsonrpc":"2.0","method":"echo","id":{id}}}"#);
        commands
            .send(BridgeCommand::Forward {
                payload: Bytes::from(payload),
                reply,
            })
            .await
            .unwrap();
        awaiting
    }

    /// Receive one forwarded request and return the sender's identity frame
    async fn next_identity(router: &mut Socket) -> Bytes {
        assert!(router.poll(Interest::Readable, Duration::from_secs(2)).await.unwrap());
        router.recv().await.unwrap().remove(0)
    }

    async fn answer(router: &mut Socket, identity: &Bytes, id: Value) {
        let reply = json!({"jsonrpc": "2.0", "result": "ok", "id": id}).to_string();
        router
            .send(vec![identity.clone(), Bytes::from(reply)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reply_for_another_id_is_dropped() {
        let (mut router, commands, stop, worker) = router_and_worker("sub-foreign").await;

        let mut awaiting = forward(&commands, 1).await;
        let identity = next_identity(&mut router).await;
        answer(&mut router, &identity, json!("foreign")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            awaiting.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert!(!worker.is_finished());

        // the matching reply still gets through afterwards
        answer(&mut router, &identity, json!(1)).await;
        let reply = tokio::time::timeout(Duration::from_secs(2), awaiting)
            .await
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["id"], json!(1));

        // and the worker serves the next call
        let next = forward(&commands, 2).await;
        let identity = next_identity(&mut router).await;
        answer(&mut router, &identity, json!(2)).await;
        assert!(tokio::time::timeout(Duration::from_secs(2), next).await.unwrap().is_ok());

        stop.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_after_reconnect_is_dropped() {
        let (mut router, commands, stop, worker) = router_and_worker("sub-late").await;

        let abandoned = forward(&commands, 7).await;
        next_identity(&mut router).await;

        let (done, reconnected) = oneshot::channel();
        commands.send(BridgeCommand::Reconnect { done }).await.unwrap();
        reconnected.await.unwrap();
        // the worker forgot the call, so its reply channel is closed
        assert!(abandoned.await.is_err());

        let mut awaiting = forward(&commands, 8).await;
        let identity = next_identity(&mut router).await;
        answer(&mut router, &identity, json!(7)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            awaiting.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        answer(&mut router, &identity, json!(8)).await;
        let reply = tokio::time::timeout(Duration::from_secs(2), awaiting)
            .await
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["id"], json!(8));

        stop.stop();
        worker.await.unwrap();
    }
}
