//! Shared socket state: the inbound queue and the table of connected peers

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, mpsc};

use super::{Multipart, SocketPattern};
use crate::error::TransportError;

/// Messages a socket buffers before senders have to wait
pub(crate) const HIGH_WATER_MARK: usize = 1000;

pub(crate) type PeerId = u64;

/// A message together with the peer it came from
#[derive(Debug)]
pub(crate) struct Inbound {
    pub peer: PeerId,
    pub frames: Multipart,
}

/// How to reach one peer
#[derive(Debug, Clone)]
pub(crate) enum PeerLink {
    /// Another socket in the same context
    Inproc {
        inbound: mpsc::Sender<Inbound>,
        /// Our id in the remote socket's peer table
        remote_id: PeerId,
        remote: Weak<SocketCore>,
    },
    /// A TCP connection served by a writer task
    Stream { outbound: mpsc::Sender<Multipart> },
}

impl PeerLink {
    /// Hand a message to the peer; gives it back if the peer is gone
    pub async fn deliver(&self, frames: Multipart) -> Result<(), Multipart> {
        match self {
            PeerLink::Inproc {
                inbound, remote_id, ..
            } => inbound
                .send(Inbound {
                    peer: *remote_id,
                    frames,
                })
                .await
                .map_err(|e| e.0.frames),
            PeerLink::Stream { outbound } => outbound.send(frames).await.map_err(|e| e.0),
        }
    }
}

#[derive(Debug)]
struct Peer {
    id: PeerId,
    link: PeerLink,
}

#[derive(Debug, Default)]
struct PeerTable {
    peers: Vec<Peer>,
    next_id: PeerId,
    cursor: usize,
}

#[derive(Debug)]
pub(crate) struct SocketCore {
    pub pattern: SocketPattern,
    pub inbound: mpsc::Sender<Inbound>,
    peers: Mutex<PeerTable>,
    peer_joined: Notify,
}

impl SocketCore {
    pub fn new(pattern: SocketPattern) -> (Arc<Self>, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(HIGH_WATER_MARK);
        let core = Arc::new(Self {
            pattern,
            inbound: tx,
            peers: Mutex::new(PeerTable::default()),
            peer_joined: Notify::new(),
        });
        (core, rx)
    }

    pub fn allocate_id(&self) -> PeerId {
        let mut table = self.peers.lock();
        table.next_id += 1;
        table.next_id
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.lock().peers.is_empty()
    }

    pub fn attach(&self, id: PeerId, link: PeerLink) {
        self.peers.lock().peers.push(Peer { id, link });
        self.peer_joined.notify_waiters();
    }

    pub fn detach(&self, id: PeerId) {
        let mut table = self.peers.lock();
        table.peers.retain(|p| p.id != id);
        if table.cursor >= table.peers.len() {
            table.cursor = 0;
        }
    }

    /// Drop every peer, returning the inproc sockets that still list us
    pub fn detach_all(&self) -> Vec<(Weak<SocketCore>, PeerId)> {
        let mut table = self.peers.lock();
        table.cursor = 0;
        table
            .peers
            .drain(..)
            .filter_map(|p| match p.link {
                PeerLink::Inproc {
                    remote, remote_id, ..
                } => Some((remote, remote_id)),
                PeerLink::Stream { .. } => None,
            })
            .collect()
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerLink> {
        self.peers
            .lock()
            .peers
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.link.clone())
    }

    /// Next peer in round-robin order
    pub fn next_peer(&self) -> Option<(PeerId, PeerLink)> {
        let mut table = self.peers.lock();
        if table.peers.is_empty() {
            return None;
        }
        let index = table.cursor % table.peers.len();
        table.cursor = (index + 1) % table.peers.len();
        let peer = &table.peers[index];
        Some((peer.id, peer.link.clone()))
    }

    pub async fn wait_for_peer(&self) {
        loop {
            let notified = self.peer_joined.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.has_peers() {
                return;
            }
            notified.await;
        }
    }

    /// Reject a second peer on an exclusive pair
    pub fn check_exclusive(&self) -> Result<(), TransportError> {
        if self.pattern == SocketPattern::Pair && self.has_peers() {
            return Err(TransportError::ConnectionRefused(
                "PAIR socket already has a peer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connect two sockets of the same context directly
pub(crate) fn link_inproc(
    local: &Arc<SocketCore>,
    remote: &Arc<SocketCore>,
) -> Result<(), TransportError> {
    if !local.pattern.is_compatible_with(remote.pattern) {
        return Err(TransportError::IncompatiblePattern {
            local: local.pattern,
            remote: remote.pattern,
        });
    }
    local.check_exclusive()?;
    remote.check_exclusive()?;

    let local_id = local.allocate_id();
    let remote_id = remote.allocate_id();
    local.attach(
        local_id,
        PeerLink::Inproc {
            inbound: remote.inbound.clone(),
            remote_id,
            remote: Arc::downgrade(remote),
        },
    );
    remote.attach(
        remote_id,
        PeerLink::Inproc {
            inbound: local.inbound.clone(),
            remote_id: local_id,
            remote: Arc::downgrade(local),
        },
    );
    Ok(())
}

/// Routing identity of a peer as it appears in ROUTER envelopes
pub(crate) fn identity(id: PeerId) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u8(0);
    buf.put_u64(id);
    buf.freeze()
}

pub(crate) fn peer_from_identity(frame: &[u8]) -> Option<PeerId> {
    match frame {
        [0, rest @ ..] if rest.len() == 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(rest);
            Some(u64::from_be_bytes(raw))
        }
        _ => None,
    }
}
