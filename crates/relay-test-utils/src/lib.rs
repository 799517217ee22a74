// relay-test-utils: shared test harness for the broker suites.
//
// Provides a raw wire-level peer, a monitor-stream tap, and an
// ephemeral-port broker starter used by the workspace integration
// suites.

use broker::{Broker, BrokerConfig};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{Message, MessageKind, ServiceRegistration, codec};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

const MAX_FRAME_BYTES: usize = 1 << 20;

fn to_io(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::other(e)
}

// ---------------------------------------------------------------------------
// Broker starter
// ---------------------------------------------------------------------------

/// A broker on ephemeral ports, ready for peers.
pub struct RunningBroker {
    pub broker: Broker,
    pub frontend: SocketAddr,
    pub backend: SocketAddr,
    pub monitor: SocketAddr,
}

/// Loopback config with ephemeral ports; timings stay at their defaults.
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        bind_addr: "127.0.0.1".to_owned(),
        frontend_port: 0,
        backend_port: 0,
        monitor_port: 0,
        ..BrokerConfig::default()
    }
}

/// Start an in-process broker for a test case.
pub async fn spawn_broker(cfg: BrokerConfig) -> RunningBroker {
    let broker = Broker::start(cfg).await.expect("broker failed to start");
    let frontend = broker.frontend_addr().expect("tcp broker has a frontend");
    let backend = broker.backend_addr().expect("tcp broker has a backend");
    let monitor = broker.monitor_addr().expect("tcp broker has a monitor");
    RunningBroker {
        broker,
        frontend,
        backend,
        monitor,
    }
}

// ---------------------------------------------------------------------------
// TestPeer
// ---------------------------------------------------------------------------

/// A raw wire-level peer speaking newline-delimited JSON.
///
/// Unlike the client library it never acks, never retries, and exposes
/// every inbound frame, which is exactly what protocol tests need.
pub struct TestPeer {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl TestPeer {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(TestPeer {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            writer: FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
        })
    }

    pub async fn send(&mut self, message: &Message) -> io::Result<()> {
        let frame = codec::encode(message).map_err(to_io)?;
        self.send_text(frame).await
    }

    /// Send a raw frame, malformed ones included.
    pub async fn send_text(&mut self, text: String) -> io::Result<()> {
        self.writer.send(text).await.map_err(to_io)
    }

    /// Next well-formed message; `None` on disconnect.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let text = self.reader.next().await?.ok()?;
            if let Ok(message) = codec::decode(&text) {
                return Some(message);
            }
        }
    }

    /// `recv` bounded by `timeout`; `None` on deadline or disconnect.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv()).await.ok()?
    }

    /// Drain frames until one matches `pred` or the deadline passes.
    pub async fn recv_matching(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Message) -> bool,
    ) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let message = self.recv_timeout(remaining).await?;
            if pred(&message) {
                return Some(message);
            }
        }
    }

    /// Register with the broker; returns once the ack arrives.
    pub async fn register(&mut self, registration: &ServiceRegistration) -> io::Result<Message> {
        let mut hello = Message::new(
            MessageKind::ServiceRegistration,
            registration.service_id.clone(),
        )
        .requiring_ack();
        hello.set_payload(registration).map_err(to_io)?;
        let hello_id = hello.id.clone();
        self.send(&hello).await?;
        self.recv_matching(Duration::from_secs(5), |m| {
            m.kind == MessageKind::Acknowledgment && m.in_response_to == hello_id
        })
        .await
        .ok_or_else(|| io::Error::other("registration was not acknowledged"))
    }
}

/// Shorthand for a registration payload.
pub fn registration(service_id: &str, service_type: &str, capabilities: &[&str]) -> ServiceRegistration {
    ServiceRegistration::new(
        service_id,
        service_id,
        service_type,
        capabilities.iter().map(|c| (*c).to_owned()).collect(),
    )
}

// ---------------------------------------------------------------------------
// MonitorTap
// ---------------------------------------------------------------------------

/// Passive subscriber on the broker's monitor stream.
pub struct MonitorTap {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    _writer: OwnedWriteHalf,
}

impl MonitorTap {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(MonitorTap {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            _writer: write_half,
        })
    }

    /// Next republished message; `None` on disconnect.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let text = self.reader.next().await?.ok()?;
            if let Ok(message) = codec::decode(&text) {
                return Some(message);
            }
        }
    }

    /// Drain the stream until a message matches `pred` or `timeout` passes.
    pub async fn recv_matching(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Message) -> bool,
    ) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let message = tokio::time::timeout(remaining, self.recv()).await.ok()??;
            if pred(&message) {
                return Some(message);
            }
        }
    }
}
