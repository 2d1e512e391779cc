//! TCP peers: each connection gets a reader and a writer task
//!
//! Both ends open with the `JRMQ/1` greeting and their pattern byte. This is
//! a private handshake, not ZMTP; libzmq peers are rejected.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::codec::MultipartCodec;
use super::peer::{HIGH_WATER_MARK, Inbound, PeerId, PeerLink, SocketCore};
use super::{Multipart, SocketPattern};
use crate::error::TransportError;

const GREETING: &[u8] = b"JRMQ/1";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Connection = Framed<TcpStream, MultipartCodec>;

pub(crate) async fn bind(
    core: &Arc<SocketCore>,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<SocketAddr, TransportError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            TransportError::AddressInUse(addr.to_string())
        } else {
            TransportError::Io(e)
        }
    })?;
    let local = listener.local_addr()?;
    debug!(%local, pattern = %core.pattern, "Listening");

    tokio::spawn(accept_loop(listener, Arc::downgrade(core), shutdown));
    Ok(local)
}

pub(crate) async fn connect(
    core: &Arc<SocketCore>,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionRefused(format!("{addr}: {e}")))?;
    attach(core, stream, shutdown).await
}

async fn accept_loop(listener: TcpListener, core: Weak<SocketCore>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                let Some(core) = core.upgrade() else { break };
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = attach(&core, stream, shutdown).await {
                        debug!(%remote, error = %e, "Rejected peer");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    trace!("Accept loop stopped");
}

async fn handshake(
    connection: &mut Connection,
    local: SocketPattern,
) -> Result<SocketPattern, TransportError> {
    connection
        .send(vec![
            Bytes::from_static(GREETING),
            Bytes::copy_from_slice(&[local.to_wire()]),
        ])
        .await?;

    let greeting = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connection.next()).await {
        Ok(Some(frames)) => frames?,
        Ok(None) => return Err(TransportError::Closed),
        Err(_) => return Err(TransportError::Protocol("handshake timed out".to_string())),
    };

    match greeting.as_slice() {
        [magic, pattern] if magic.as_ref() == GREETING && pattern.len() == 1 => {
            SocketPattern::from_wire(pattern[0]).ok_or_else(|| {
                TransportError::Protocol(format!("unknown socket pattern byte {}", pattern[0]))
            })
        }
        _ => Err(TransportError::Protocol("bad greeting".to_string())),
    }
}

async fn attach(
    core: &Arc<SocketCore>,
    stream: TcpStream,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let mut connection = Framed::new(stream, MultipartCodec::default());

    let remote = handshake(&mut connection, core.pattern).await?;
    if !core.pattern.is_compatible_with(remote) {
        return Err(TransportError::IncompatiblePattern {
            local: core.pattern,
            remote,
        });
    }
    core.check_exclusive()?;

    let (sink, stream) = connection.split();
    let (outbound, outbound_rx) = mpsc::channel(HIGH_WATER_MARK);
    let id = core.allocate_id();
    core.attach(id, PeerLink::Stream { outbound });
    debug!(peer = id, remote = %remote, "Peer attached");

    tokio::spawn(write_loop(sink, outbound_rx, shutdown.clone()));
    tokio::spawn(read_loop(
        stream,
        core.inbound.clone(),
        id,
        Arc::downgrade(core),
        shutdown,
    ));
    Ok(())
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<Connection, Multipart>,
    mut outbound: mpsc::Receiver<Multipart>,
    shutdown: CancellationToken,
) {
    loop {
        let frames = tokio::select! {
            _ = shutdown.cancelled() => break,
            frames = outbound.recv() => match frames {
                Some(frames) => frames,
                None => break,
            },
        };
        if let Err(e) = sink.send(frames).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<Connection>,
    inbound: mpsc::Sender<Inbound>,
    peer: PeerId,
    core: Weak<SocketCore>,
    shutdown: CancellationToken,
) {
    loop {
        let frames = tokio::select! {
            _ = shutdown.cancelled() => break,
            frames = stream.next() => frames,
        };
        match frames {
            Some(Ok(frames)) => {
                if inbound.send(Inbound { peer, frames }).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                debug!(peer, error = %e, "Read failed");
                break;
            }
            None => break,
        }
    }
    if let Some(core) = core.upgrade() {
        core.detach(peer);
    }
    trace!(peer, "Peer detached");
}
