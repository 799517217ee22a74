//! In-process channel transport.
//!
//! One unbounded FIFO per connected peer plus a shared broadcast FIFO
//! for the monitor.  The peer handle is the peer id itself.  Used by
//! tests and embedded single-process deployments.

use super::{PeerHandle, Side, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use relay_protocol::{CodecError, Message, codec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

const MONITOR_QUEUE_DEPTH: usize = 1024;

pub struct ChannelTransport {
    events: mpsc::Sender<TransportEvent>,
    peers: Mutex<HashMap<PeerHandle, mpsc::UnboundedSender<String>>>,
    monitor_tx: broadcast::Sender<String>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        let (monitor_tx, _) = broadcast::channel(MONITOR_QUEUE_DEPTH);
        Arc::new(ChannelTransport {
            events,
            peers: Mutex::new(HashMap::new()),
            monitor_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Attach a new in-process peer and announce it to the engine.
    pub async fn connect(&self, peer_id: &str, side: Side) -> ChannelPeer {
        let handle = PeerHandle::from(peer_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(handle.clone(), tx);
        let _ = self
            .events
            .send(TransportEvent::PeerConnected {
                peer: handle.clone(),
                side,
            })
            .await;
        ChannelPeer {
            handle,
            side,
            events: self.events.clone(),
            inbound: rx,
        }
    }

    /// A fresh view of the monitor stream.
    pub fn subscribe_monitor(&self) -> broadcast::Receiver<String> {
        self.monitor_tx.subscribe()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, peer: &PeerHandle, frame: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        let tx = { self.peers.lock().unwrap().get(peer).cloned() };
        match tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| TransportError::PeerGone(peer.clone())),
            None => Err(TransportError::PeerGone(peer.clone())),
        }
    }

    async fn publish(&self, frame: String) -> Result<(), TransportError> {
        let _ = self.monitor_tx.send(frame);
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerHandle) {
        self.peers.lock().unwrap().remove(peer);
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.peers.lock().unwrap().clear();
    }
}

/// Duplex handle held by an in-process peer.
pub struct ChannelPeer {
    handle: PeerHandle,
    side: Side,
    events: mpsc::Sender<TransportEvent>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl ChannelPeer {
    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Hand a raw frame to the routing engine, as if read off the wire.
    pub async fn send_text(&self, text: String) {
        let _ = self
            .events
            .send(TransportEvent::Frame {
                peer: self.handle.clone(),
                side: self.side,
                text,
            })
            .await;
    }

    pub async fn send(&self, message: &Message) -> Result<(), CodecError> {
        self.send_text(codec::encode(message)?).await;
        Ok(())
    }

    /// Next frame from the broker, already decoded.  Returns `None` when
    /// the session is gone; malformed frames are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let text = self.inbound.recv().await?;
            if let Ok(message) = codec::decode(&text) {
                return Some(message);
            }
        }
    }

    /// End the session and tell the engine the peer is gone.
    pub async fn close(self) {
        let _ = self
            .events
            .send(TransportEvent::PeerClosed {
                peer: self.handle.clone(),
                side: self.side,
            })
            .await;
    }
}
