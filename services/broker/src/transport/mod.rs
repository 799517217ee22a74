//! Transport seam between the routing engine and its peers.
//!
//! The broker creates one event channel and hands the sender to the
//! transport at construction; everything a peer sends arrives on that
//! channel as a [`TransportEvent`].  Outbound traffic goes through the
//! [`Transport`] trait, selected at construction time:
//!
//! - [`TcpTransport`](tcp::TcpTransport) — framed TCP sockets, one
//!   listener per side plus the publish-only monitor.
//! - [`ChannelTransport`](channel::ChannelTransport) — in-process FIFOs
//!   for tests and embedded deployments.
//!
//! Guarantees: FIFO per (peer, direction); sends to one peer are
//! serialized through that peer's writer, sends to distinct peers may
//! interleave.

pub mod channel;
pub mod tcp;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Largest accepted wire frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Which endpoint a peer connected through.
///
/// The broker treats both identically apart from this flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Frontend,
    Backend,
}

impl Side {
    pub fn is_backend(self) -> bool {
        matches!(self, Side::Backend)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Frontend => "frontend",
            Side::Backend => "backend",
        })
    }
}

/// Opaque transport-level address of a connected peer.
///
/// Assigned on first contact and stable for the lifetime of that
/// session; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle(Arc<str>);

impl PeerHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerHandle {
    fn from(id: &str) -> Self {
        PeerHandle(Arc::from(id))
    }
}

impl From<String> for PeerHandle {
    fn from(id: String) -> Self {
        PeerHandle(Arc::from(id))
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the transport reports to the routing engine.
#[derive(Debug)]
pub enum TransportEvent {
    PeerConnected {
        peer: PeerHandle,
        side: Side,
    },
    Frame {
        peer: PeerHandle,
        side: Side,
        text: String,
    },
    PeerClosed {
        peer: PeerHandle,
        side: Side,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer's session has ended; permanent for that peer.
    #[error("peer {0} is gone")]
    PeerGone(PeerHandle),
    #[error("transport is shut down")]
    Closed,
}

/// Outbound half of a broker transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue `frame` for delivery to `peer`.
    async fn send(&self, peer: &PeerHandle, frame: String) -> Result<(), TransportError>;

    /// Publish `frame` to every monitor subscriber.  Zero subscribers is
    /// a success.
    async fn publish(&self, frame: String) -> Result<(), TransportError>;

    /// Drop the session for `peer`, if any.
    async fn disconnect(&self, peer: &PeerHandle);

    /// Stop accepting and tear down all sessions.
    fn shutdown(&self);
}
