use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::peer::{self, Inbound, PeerId, SocketCore};
use super::{Address, Context, Interest, Multipart, SocketPattern, tcp};
use crate::error::TransportError;

/// Where a lockstep socket is in its send/receive cycle
#[derive(Debug)]
enum Lockstep {
    Idle,
    /// REQ sent a request to this peer and must read its reply next
    AwaitingReply(PeerId),
    /// REP read a request and must answer it next
    Replying { peer: PeerId, envelope: Multipart },
}

/// A message-queue socket.
///
/// Dropping the socket closes it: inproc names are released, peers are
/// detached and TCP tasks are stopped.
pub struct Socket {
    core: Arc<SocketCore>,
    inbound: mpsc::Receiver<Inbound>,
    /// A message taken off the queue by [`Socket::poll`] but not yet read
    pending: Option<Inbound>,
    state: Lockstep,
    context: Context,
    bound: Vec<String>,
    last_endpoint: Option<String>,
    shutdown: CancellationToken,
}

impl Socket {
    pub(crate) fn new(context: Context, pattern: SocketPattern) -> Self {
        let (core, inbound) = SocketCore::new(pattern);
        Self {
            core,
            inbound,
            pending: None,
            state: Lockstep::Idle,
            context,
            bound: Vec::new(),
            last_endpoint: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pattern(&self) -> SocketPattern {
        self.core.pattern
    }

    /// The last address bound or connected; for `tcp://host:0` binds this
    /// carries the port actually chosen
    pub fn last_endpoint(&self) -> Option<&str> {
        self.last_endpoint.as_deref()
    }

    pub async fn bind(&mut self, address: &str) -> Result<(), TransportError> {
        match Address::parse(address)? {
            Address::Inproc(name) => {
                self.context.register(&name, &self.core)?;
                self.bound.push(name);
                self.last_endpoint = Some(address.to_string());
            }
            Address::Tcp(addr) => {
                let local = tcp::bind(&self.core, &addr, self.shutdown.clone()).await?;
                self.last_endpoint = Some(format!("tcp://{local}"));
            }
        }
        Ok(())
    }

    pub async fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        match Address::parse(address)? {
            Address::Inproc(name) => {
                let remote = self.context.lookup(&name).ok_or_else(|| {
                    TransportError::ConnectionRefused(format!("nothing bound at {address}"))
                })?;
                peer::link_inproc(&self.core, &remote)?;
            }
            Address::Tcp(addr) => {
                tcp::connect(&self.core, &addr, self.shutdown.clone()).await?;
            }
        }
        self.last_endpoint = Some(address.to_string());
        Ok(())
    }

    /// Wait up to `timeout` for the socket to become ready.
    ///
    /// Readiness to read means a message is buffered and the next
    /// [`Socket::recv`] returns it immediately. Readiness to write means a
    /// send would not have to wait for a peer or break the lockstep cycle.
    pub async fn poll(
        &mut self,
        interest: Interest,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        match interest {
            Interest::Readable => {
                self.check(self.pattern().can_recv(), "receive")?;
                if self.pending.is_some() {
                    return Ok(true);
                }
                match tokio::time::timeout(timeout, self.next_admissible()).await {
                    Ok(inbound) => {
                        self.pending = Some(inbound?);
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                }
            }
            Interest::Writable => {
                self.check(self.pattern().can_send(), "send")?;
                Ok(tokio::time::timeout(timeout, self.writable()).await.is_ok())
            }
        }
    }

    pub async fn send(&mut self, frames: Multipart) -> Result<(), TransportError> {
        self.check(self.pattern().can_send(), "send")?;

        match self.pattern() {
            SocketPattern::Req => {
                if !matches!(self.state, Lockstep::Idle) {
                    return Err(TransportError::InvalidState(
                        "REQ socket is still waiting for a reply",
                    ));
                }
                let mut message = Vec::with_capacity(frames.len() + 1);
                message.push(Bytes::new());
                message.extend(frames);
                let peer = self.deliver_round_robin(message).await;
                self.state = Lockstep::AwaitingReply(peer);
            }
            SocketPattern::Rep => {
                let Lockstep::Replying { peer, mut envelope } =
                    std::mem::replace(&mut self.state, Lockstep::Idle)
                else {
                    return Err(TransportError::InvalidState(
                        "REP socket has no request to answer",
                    ));
                };
                envelope.extend(frames);
                self.deliver_to(peer, envelope).await;
            }
            SocketPattern::Router => {
                let mut frames = frames.into_iter();
                let identity = frames.next().ok_or_else(|| {
                    TransportError::Protocol("ROUTER message needs an identity frame".to_string())
                })?;
                match peer::peer_from_identity(&identity) {
                    Some(peer) => self.deliver_to(peer, frames.collect()).await,
                    None => trace!("Dropping message for unknown identity"),
                }
            }
            _ => {
                self.deliver_round_robin(frames).await;
            }
        }
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Multipart, TransportError> {
        self.check(self.pattern().can_recv(), "receive")?;
        let inbound = match self.pending.take() {
            Some(inbound) => inbound,
            None => self.next_admissible().await?,
        };
        Ok(self.accept(inbound))
    }

    fn check(&self, allowed: bool, operation: &'static str) -> Result<(), TransportError> {
        if allowed {
            Ok(())
        } else {
            Err(TransportError::Unsupported {
                pattern: self.pattern(),
                operation,
            })
        }
    }

    async fn writable(&self) {
        match (self.pattern(), &self.state) {
            (SocketPattern::Router, _) | (SocketPattern::Rep, Lockstep::Replying { .. }) => {}
            (SocketPattern::Rep, _) | (SocketPattern::Req, Lockstep::AwaitingReply(_)) => {
                std::future::pending::<()>().await
            }
            _ => self.core.wait_for_peer().await,
        }
    }

    async fn deliver_round_robin(&self, mut message: Multipart) -> PeerId {
        loop {
            let Some((peer, link)) = self.core.next_peer() else {
                self.core.wait_for_peer().await;
                continue;
            };
            match link.deliver(message).await {
                Ok(()) => return peer,
                Err(returned) => {
                    trace!(peer, "Peer went away, trying the next one");
                    self.core.detach(peer);
                    message = returned;
                }
            }
        }
    }

    /// Send to one specific peer; the message is lost if it has gone away
    async fn deliver_to(&self, peer: PeerId, message: Multipart) {
        match self.core.peer(peer) {
            Some(link) => {
                if link.deliver(message).await.is_err() {
                    self.core.detach(peer);
                }
            }
            None => trace!(peer, "Dropping message for departed peer"),
        }
    }

    async fn next_admissible(&mut self) -> Result<Inbound, TransportError> {
        loop {
            let inbound = self.inbound.recv().await.ok_or(TransportError::Closed)?;
            if self.admits(&inbound) {
                return Ok(inbound);
            }
            trace!(peer = inbound.peer, "Discarding message out of sequence");
        }
    }

    fn admits(&self, inbound: &Inbound) -> bool {
        match (self.pattern(), &self.state) {
            (SocketPattern::Req, Lockstep::AwaitingReply(peer)) => {
                inbound.peer == *peer && inbound.frames.first().is_some_and(|f| f.is_empty())
            }
            (SocketPattern::Req, _) => false,
            _ => true,
        }
    }

    fn accept(&mut self, inbound: Inbound) -> Multipart {
        let Inbound { peer, mut frames } = inbound;
        match self.pattern() {
            SocketPattern::Req => {
                self.state = Lockstep::Idle;
                frames.remove(0);
                frames
            }
            SocketPattern::Rep => {
                // Everything up to the empty delimiter is routing; peers that
                // send no delimiter get their reply without one.
                let split = frames.iter().position(|f| f.is_empty()).map_or(0, |i| i + 1);
                let body = frames.split_off(split);
                self.state = Lockstep::Replying {
                    peer,
                    envelope: frames,
                };
                body
            }
            SocketPattern::Router => {
                frames.insert(0, peer::identity(peer));
                frames
            }
            _ => frames,
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for name in &self.bound {
            self.context.release(name, &self.core);
        }
        for (remote, id) in self.core.detach_all() {
            if let Some(remote) = remote.upgrade() {
                remote.detach(id);
            }
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("pattern", &self.core.pattern)
            .field("last_endpoint", &self.last_endpoint)
            .field("state", &self.state)
            .finish()
    }
}
