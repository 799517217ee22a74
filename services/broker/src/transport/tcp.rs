//! Framed TCP transport.
//!
//! One listener per side (frontend, backend) plus the publish-only
//! monitor.  Frames are newline-delimited JSON.  Each accepted
//! connection gets a reader task feeding the shared event channel and a
//! writer task draining a per-peer queue, which serializes sends to that
//! peer.  Monitor subscribers each drain their own broadcast receiver;
//! a lagging subscriber skips missed frames, the rest are unaffected.

use super::{MAX_FRAME_BYTES, PeerHandle, Side, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

/// Capacity of each per-peer outbound queue.
const PEER_QUEUE_DEPTH: usize = 256;
/// Pending monitor frames per subscriber before overrun.
const MONITOR_QUEUE_DEPTH: usize = 1024;

/// Startup bind failure; fatal for the broker.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {endpoint} endpoint: {source}")]
pub struct BindError {
    pub endpoint: &'static str,
    #[source]
    pub source: io::Error,
}

pub struct TcpTransport {
    outbound: RwLock<HashMap<PeerHandle, mpsc::Sender<String>>>,
    monitor_tx: broadcast::Sender<String>,
    shutdown_tx: watch::Sender<bool>,
    next_peer: AtomicU64,
    frontend_addr: SocketAddr,
    backend_addr: SocketAddr,
    monitor_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind all three listeners and start accepting.  Peer frames arrive
    /// on `events`.
    pub async fn bind(
        bind_addr: &str,
        frontend_port: u16,
        backend_port: u16,
        monitor_port: u16,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<Self>, BindError> {
        let frontend = listen(bind_addr, frontend_port, "frontend").await?;
        let backend = listen(bind_addr, backend_port, "backend").await?;
        let monitor = listen(bind_addr, monitor_port, "monitor").await?;

        let (monitor_tx, _) = broadcast::channel(MONITOR_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let transport = Arc::new(TcpTransport {
            outbound: RwLock::new(HashMap::new()),
            monitor_tx: monitor_tx.clone(),
            shutdown_tx,
            next_peer: AtomicU64::new(1),
            frontend_addr: frontend.local_addr().map_err(|e| BindError {
                endpoint: "frontend",
                source: e,
            })?,
            backend_addr: backend.local_addr().map_err(|e| BindError {
                endpoint: "backend",
                source: e,
            })?,
            monitor_addr: monitor.local_addr().map_err(|e| BindError {
                endpoint: "monitor",
                source: e,
            })?,
        });

        tokio::spawn(accept_side(
            Arc::clone(&transport),
            frontend,
            Side::Frontend,
            events.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(accept_side(
            Arc::clone(&transport),
            backend,
            Side::Backend,
            events,
            shutdown_rx.clone(),
        ));
        tokio::spawn(accept_monitor(monitor, monitor_tx, shutdown_rx));

        Ok(transport)
    }

    pub fn frontend_addr(&self) -> SocketAddr {
        self.frontend_addr
    }

    pub fn backend_addr(&self) -> SocketAddr {
        self.backend_addr
    }

    pub fn monitor_addr(&self) -> SocketAddr {
        self.monitor_addr
    }

    fn assign_handle(&self, side: Side) -> PeerHandle {
        let n = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let prefix = match side {
            Side::Frontend => "fe",
            Side::Backend => "be",
        };
        PeerHandle::from(format!("{prefix}-{n}"))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &PeerHandle, frame: String) -> Result<(), TransportError> {
        let tx = { self.outbound.read().await.get(peer).cloned() };
        match tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| TransportError::PeerGone(peer.clone())),
            None => Err(TransportError::PeerGone(peer.clone())),
        }
    }

    async fn publish(&self, frame: String) -> Result<(), TransportError> {
        // Err here only means zero subscribers.
        let _ = self.monitor_tx.send(frame);
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerHandle) {
        // Dropping the queue sender ends the writer; the reader ends when
        // the socket closes.
        self.outbound.write().await.remove(peer);
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn listen(bind_addr: &str, port: u16, endpoint: &'static str) -> Result<TcpListener, BindError> {
    TcpListener::bind((bind_addr, port))
        .await
        .map_err(|source| BindError { endpoint, source })
}

// ---------------------------------------------------------------------------
// Accept loops
// ---------------------------------------------------------------------------

async fn accept_side(
    transport: Arc<TcpTransport>,
    listener: TcpListener,
    side: Side,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() { break; }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, remote)) => {
                        let peer = transport.assign_handle(side);
                        debug!(%peer, %side, %remote, "peer connected");
                        tokio::spawn(serve_peer(
                            Arc::clone(&transport),
                            stream,
                            peer,
                            side,
                            events.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => warn!(%side, error = %e, "accept error"),
                }
            }
        }
    }
    debug!(%side, "accept loop exited");
}

async fn accept_monitor(
    listener: TcpListener,
    monitor_tx: broadcast::Sender<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() { break; }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, remote)) => {
                        debug!(%remote, "monitor subscriber connected");
                        tokio::spawn(serve_monitor_subscriber(stream, monitor_tx.subscribe()));
                    }
                    Err(e) => warn!(error = %e, "monitor accept error"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection tasks
// ---------------------------------------------------------------------------

/// Drive one peer session: reader in this task, writer in a sibling.
async fn serve_peer(
    transport: Arc<TcpTransport>,
    stream: TcpStream,
    peer: PeerHandle,
    side: Side,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader: FramedRead<OwnedReadHalf, LinesCodec> =
        FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let mut writer: FramedWrite<OwnedWriteHalf, LinesCodec> =
        FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    let (tx, mut rx) = mpsc::channel::<String>(PEER_QUEUE_DEPTH);
    transport.outbound.write().await.insert(peer.clone(), tx);
    if events
        .send(TransportEvent::PeerConnected {
            peer: peer.clone(),
            side,
        })
        .await
        .is_err()
    {
        // Engine gone; session is pointless.
        transport.outbound.write().await.remove(&peer);
        return;
    }

    let writer_peer = peer.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.send(frame).await {
                debug!(peer = %writer_peer, error = %e, "peer write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() { break; }
            }
            item = reader.next() => {
                match item {
                    Some(Ok(text)) => {
                        if events
                            .send(TransportEvent::Frame { peer: peer.clone(), side, text })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%peer, error = %e, "peer read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    transport.outbound.write().await.remove(&peer);
    let _ = events
        .send(TransportEvent::PeerClosed {
            peer: peer.clone(),
            side,
        })
        .await;
    // Queue senders are gone; let the writer drain and finish.
    let _ = writer_task.await;
    debug!(%peer, "peer session ended");
}

/// Forward every monitor frame to one subscriber until it disconnects.
async fn serve_monitor_subscriber(stream: TcpStream, mut rx: broadcast::Receiver<String>) {
    let mut writer = FramedWrite::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    loop {
        match rx.recv().await {
            Ok(frame) => {
                if writer.send(frame).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "monitor subscriber lagging; frames skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
