//! The path a client's encoded requests take to the server.
//!
//! A [`SocketLink`] talks to the server directly. A [`BridgeLink`] hands the
//! request to a subscription worker, which owns the real socket and passes
//! the matching reply back.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientResult, TransportError};
use crate::transport::{Interest, Socket};

/// A request/reply channel as seen by [`crate::RpcClient`]
#[async_trait]
pub trait RequestLink: Send {
    /// Address of the server, for diagnostics
    fn endpoint(&self) -> &str;

    /// Whether replies can ever come back on this link
    fn expects_replies(&self) -> bool;

    /// Wait up to `timeout` until a request can be sent
    async fn writable(&mut self, timeout: Duration) -> ClientResult<bool>;

    async fn send(&mut self, payload: Bytes) -> ClientResult<()>;

    /// Wait up to `timeout` until a reply can be read
    async fn readable(&mut self, timeout: Duration) -> ClientResult<bool>;

    async fn recv(&mut self) -> ClientResult<Bytes>;

    /// Discard the connection and anything in flight, then reconnect
    async fn reset(&mut self) -> ClientResult<()>;
}

pub type BoxedLink = Box<dyn RequestLink>;

/// Direct connection to the server over one socket
pub struct SocketLink {
    endpoint: Endpoint,
    socket: Option<Socket>,
}

impl SocketLink {
    pub async fn connect(endpoint: Endpoint) -> ClientResult<Self> {
        let socket = endpoint.connect().await?;
        Ok(Self {
            endpoint,
            socket: Some(socket),
        })
    }

    fn socket(&mut self) -> ClientResult<&mut Socket> {
        self.socket
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Closed))
    }
}

/// Last frame of a multipart message; leading frames are routing
pub(crate) fn payload_of(mut frames: Vec<Bytes>) -> Result<Bytes, TransportError> {
    frames
        .pop()
        .ok_or_else(|| TransportError::Protocol("empty message".to_string()))
}

#[async_trait]
impl RequestLink for SocketLink {
    fn endpoint(&self) -> &str {
        self.endpoint.address()
    }

    fn expects_replies(&self) -> bool {
        self.endpoint.pattern().can_recv()
    }

    async fn writable(&mut self, timeout: Duration) -> ClientResult<bool> {
        Ok(self.socket()?.poll(Interest::Writable, timeout).await?)
    }

    async fn send(&mut self, payload: Bytes) -> ClientResult<()> {
        Ok(self.socket()?.send(vec![payload]).await?)
    }

    async fn readable(&mut self, timeout: Duration) -> ClientResult<bool> {
        Ok(self.socket()?.poll(Interest::Readable, timeout).await?)
    }

    async fn recv(&mut self) -> ClientResult<Bytes> {
        let frames = self.socket()?.recv().await?;
        Ok(payload_of(frames)?)
    }

    async fn reset(&mut self) -> ClientResult<()> {
        // Close first so nothing queued on the old socket is delivered
        self.socket = None;
        self.socket = Some(self.endpoint.connect().await?);
        Ok(())
    }
}

/// Instructions from a client to the subscription worker
#[derive(Debug)]
pub(crate) enum BridgeCommand {
    /// Send an encoded request; a reply with its id goes to `reply`
    Forward {
        payload: Bytes,
        reply: oneshot::Sender<Bytes>,
    },
    /// Recreate the worker's socket and forget the awaited id
    Reconnect { done: oneshot::Sender<()> },
}

/// Link through a subscription worker
pub(crate) struct BridgeLink {
    endpoint: String,
    expects_replies: bool,
    commands: mpsc::Sender<BridgeCommand>,
    awaiting: Option<oneshot::Receiver<Bytes>>,
    ready: Option<Bytes>,
}

impl BridgeLink {
    pub fn new(
        endpoint: impl Into<String>,
        expects_replies: bool,
        commands: mpsc::Sender<BridgeCommand>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            expects_replies,
            commands,
            awaiting: None,
            ready: None,
        }
    }
}

#[async_trait]
impl RequestLink for BridgeLink {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn expects_replies(&self) -> bool {
        self.expects_replies
    }

    async fn writable(&mut self, _timeout: Duration) -> ClientResult<bool> {
        if self.commands.is_closed() {
            return Err(ClientError::WorkerStopped);
        }
        Ok(true)
    }

    async fn send(&mut self, payload: Bytes) -> ClientResult<()> {
        let (reply, awaiting) = oneshot::channel();
        self.ready = None;
        self.commands
            .send(BridgeCommand::Forward { payload, reply })
            .await
            .map_err(|_| ClientError::WorkerStopped)?;
        self.awaiting = Some(awaiting);
        Ok(())
    }

    async fn readable(&mut self, timeout: Duration) -> ClientResult<bool> {
        if self.ready.is_some() {
            return Ok(true);
        }
        let Some(awaiting) = self.awaiting.as_mut() else {
            return Err(TransportError::InvalidState("no request is awaiting a reply").into());
        };
        let outcome = tokio::time::timeout(timeout, awaiting).await;
        match outcome {
            Ok(Ok(reply)) => {
                self.awaiting = None;
                self.ready = Some(reply);
                Ok(true)
            }
            Ok(Err(_)) => {
                self.awaiting = None;
                Err(ClientError::WorkerStopped)
            }
            Err(_) => Ok(false),
        }
    }

    async fn recv(&mut self) -> ClientResult<Bytes> {
        if let Some(reply) = self.ready.take() {
            return Ok(reply);
        }
        let awaiting = self.awaiting.take().ok_or(ClientError::Transport(
            TransportError::InvalidState("no request is awaiting a reply"),
        ))?;
        awaiting.await.map_err(|_| ClientError::WorkerStopped)
    }

    async fn reset(&mut self) -> ClientResult<()> {
        self.awaiting = None;
        self.ready = None;
        let (done, reconnected) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Reconnect { done })
            .await
            .map_err(|_| ClientError::WorkerStopped)?;
        reconnected.await.map_err(|_| ClientError::WorkerStopped)
    }
}
