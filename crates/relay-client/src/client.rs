//! Broker client session.
//!
//! # Protocol
//! 1. Connect to the broker's frontend (or backend) endpoint.
//! 2. Send one `ServiceRegistration` with `requiresAcknowledgment` and
//!    wait for the broker's `Acknowledgment` (connect timeout, default
//!    5 s) before reporting connected.
//! 3. Answer every `Heartbeat` and `Ping` with an `Acknowledgment`
//!    referencing its id.
//! 4. Auto-acknowledge any other inbound message that requires one, then
//!    deliver it.
//! 5. On transport loss, fail pending requests with `ConnectionLost` and
//!    report disconnected; the caller drives reconnection.  Registration
//!    is never retried automatically.

use crate::peer_cache::PeerCache;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{CodecError, Message, MessageKind, ServiceRegistration, codec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

/// Largest accepted wire frame, in bytes.
const MAX_FRAME_BYTES: usize = 1 << 20;
const COMMAND_QUEUE_DEPTH: usize = 64;
const DELIVERY_QUEUE_DEPTH: usize = 256;

type Reader = FramedRead<OwnedReadHalf, LinesCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LinesCodec>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker endpoint, e.g. `127.0.0.1:5570`.
    pub broker_addr: String,
    pub service_id: String,
    pub service_name: String,
    pub service_type: String,
    pub capabilities: Vec<String>,
    /// How long to wait for the registration acknowledgment.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        broker_addr: impl Into<String>,
        service_id: impl Into<String>,
        service_type: impl Into<String>,
    ) -> Self {
        let service_id = service_id.into();
        ClientConfig {
            broker_addr: broker_addr.into(),
            service_name: service_id.clone(),
            service_id,
            service_type: service_type.into(),
            capabilities: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("registration was not acknowledged within {0:?}")]
    ConnectTimeout(Duration),
    #[error("request timed out")]
    RequestTimeout,
    #[error("connection to the broker was lost")]
    ConnectionLost,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

enum Command {
    Send(Message),
    Request {
        message: Message,
        reply: oneshot::Sender<Result<Message, ClientError>>,
    },
    Cancel {
        id: String,
    },
}

/// A connected broker session.
///
/// All methods take `&self`; dropping the client ends the session task.
#[derive(Debug)]
pub struct Client {
    service_id: String,
    commands: mpsc::Sender<Command>,
    deliveries: broadcast::Sender<Message>,
    peers: Arc<PeerCache>,
    connected: watch::Receiver<bool>,
}

impl Client {
    /// Connect, register, and wait for the broker's acknowledgment.
    pub async fn connect(cfg: ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&cfg.broker_addr)
            .await
            .map_err(|e| ClientError::Connect(format!("{}: {}", cfg.broker_addr, e)))?;
        let (read_half, write_half) = stream.into_split();
        let mut reader: Reader =
            FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let mut writer: Writer =
            FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

        let registration = ServiceRegistration {
            service_id: cfg.service_id.clone(),
            service_name: cfg.service_name.clone(),
            service_type: cfg.service_type.clone(),
            capabilities: cfg.capabilities.clone(),
            endpoint: None,
            publisher_port: None,
            subscriber_port: None,
        };
        let mut hello =
            Message::new(MessageKind::ServiceRegistration, cfg.service_id.clone()).requiring_ack();
        hello
            .set_payload(&registration)
            .map_err(CodecError::from)?;
        let hello_id = hello.id.clone();
        send_message(&mut writer, &hello).await?;

        tokio::time::timeout(
            cfg.connect_timeout,
            await_registration_ack(&mut reader, &mut writer, &cfg.service_id, &hello_id),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout(cfg.connect_timeout))??;
        info!(service_id = %cfg.service_id, broker = %cfg.broker_addr, "registered with broker");

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (deliveries_tx, _) = broadcast::channel(DELIVERY_QUEUE_DEPTH);
        let (connected_tx, connected_rx) = watch::channel(true);
        let peers = Arc::new(PeerCache::new());

        let session = SessionTask {
            service_id: cfg.service_id.clone(),
            reader,
            writer,
            commands: commands_rx,
            deliveries: deliveries_tx.clone(),
            connected: connected_tx,
            peers: Arc::clone(&peers),
        };
        tokio::spawn(session.run());

        Ok(Client {
            service_id: cfg.service_id,
            commands: commands_tx,
            deliveries: deliveries_tx,
            peers,
            connected: connected_rx,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Changes to `false` once the transport is lost.
    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Peers learned from broadcast registrations, ordered by id.
    pub fn known_peers(&self) -> Vec<ServiceRegistration> {
        self.peers.all()
    }

    /// Inbound messages not claimed by a pending request.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.deliveries.subscribe()
    }

    /// Fire-and-forget send through the broker.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        self.commands
            .send(Command::Send(message))
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Send `kind`/`payload` to `target` and resolve with the first
    /// non-acknowledgment message answering it, or `RequestTimeout`.
    pub async fn request(
        &self,
        target: &str,
        kind: MessageKind,
        payload: impl Into<String>,
        timeout: Duration,
    ) -> Result<Message, ClientError> {
        let message = Message::new(kind, self.service_id.clone())
            .with_receiver(target)
            .with_payload(payload)
            .requiring_ack();
        let id = message.id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClientError::ConnectionLost)?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                let _ = self.commands.send(Command::Cancel { id }).await;
                Err(ClientError::RequestTimeout)
            }
        }
    }

    /// Answer a previously received message with a `Response`.
    pub async fn respond(
        &self,
        original: &Message,
        payload: impl Into<String>,
    ) -> Result<(), ClientError> {
        let response = Message::new(MessageKind::Response, self.service_id.clone())
            .with_receiver(original.sender_id.clone())
            .in_reply_to(original.id.clone())
            .with_payload(payload);
        self.send(response).await
    }
}

// ---------------------------------------------------------------------------
// Handshake helpers
// ---------------------------------------------------------------------------

async fn send_message(writer: &mut Writer, message: &Message) -> Result<(), ClientError> {
    let frame = codec::encode(message)?;
    writer
        .send(frame)
        .await
        .map_err(|e| ClientError::Connect(e.to_string()))
}

/// Wait for the broker to acknowledge the registration, answering any
/// heartbeat that interleaves.
async fn await_registration_ack(
    reader: &mut Reader,
    writer: &mut Writer,
    service_id: &str,
    hello_id: &str,
) -> Result<(), ClientError> {
    loop {
        match reader.next().await {
            None => return Err(ClientError::ConnectionLost),
            Some(Err(e)) => return Err(ClientError::Connect(e.to_string())),
            Some(Ok(text)) => {
                let message = match codec::decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed frame during handshake");
                        continue;
                    }
                };
                match message.kind {
                    MessageKind::Acknowledgment if message.in_response_to == hello_id => {
                        return Ok(());
                    }
                    MessageKind::Error if message.in_response_to == hello_id => {
                        return Err(ClientError::Connect(format!(
                            "broker rejected registration: {}",
                            message.payload
                        )));
                    }
                    MessageKind::Heartbeat | MessageKind::Ping => {
                        debug!("answering broker liveness probe during handshake");
                        send_message(writer, &Message::ack_for(&message, service_id)).await?;
                    }
                    _ => continue,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct SessionTask {
    service_id: String,
    reader: Reader,
    writer: Writer,
    commands: mpsc::Receiver<Command>,
    deliveries: broadcast::Sender<Message>,
    connected: watch::Sender<bool>,
    peers: Arc<PeerCache>,
}

impl SessionTask {
    async fn run(mut self) {
        let mut pending: HashMap<String, oneshot::Sender<Result<Message, ClientError>>> =
            HashMap::new();
        let lost = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        // Client dropped; clean exit.
                        None => break false,
                        Some(Command::Send(message)) => {
                            if self.send(&message).await.is_err() { break true; }
                        }
                        Some(Command::Request { message, reply }) => {
                            let id = message.id.clone();
                            if self.send(&message).await.is_err() {
                                let _ = reply.send(Err(ClientError::ConnectionLost));
                                break true;
                            }
                            pending.insert(id, reply);
                        }
                        Some(Command::Cancel { id }) => {
                            pending.remove(&id);
                        }
                    }
                }
                frame = self.reader.next() => {
                    match frame {
                        None => break true,
                        Some(Err(e)) => {
                            warn!(error = %e, "broker read failed");
                            break true;
                        }
                        Some(Ok(text)) => {
                            match codec::decode(&text) {
                                Err(e) => warn!(error = %e, "dropping malformed frame"),
                                Ok(message) => {
                                    if self.handle_inbound(message, &mut pending).await.is_err() {
                                        break true;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };

        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(ClientError::ConnectionLost));
        }
        let _ = self.connected.send(false);
        if lost {
            info!(service_id = %self.service_id, "broker connection lost");
        } else {
            debug!(service_id = %self.service_id, "session closed");
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        send_message(&mut self.writer, message).await
    }

    async fn handle_inbound(
        &mut self,
        message: Message,
        pending: &mut HashMap<String, oneshot::Sender<Result<Message, ClientError>>>,
    ) -> Result<(), ClientError> {
        match message.kind {
            MessageKind::Heartbeat | MessageKind::Ping => {
                let ack = Message::ack_for(&message, self.service_id.clone());
                self.send(&ack).await?;
            }
            MessageKind::ServiceRegistration => {
                match message.payload_as::<ServiceRegistration>() {
                    Ok(registration) => self.peers.insert(registration),
                    Err(e) => warn!(error = %e, "broadcast registration with malformed payload"),
                }
                let _ = self.deliveries.send(message);
            }
            // Acks never resolve requests; the real reply does.  They are
            // still observable through subscribe().
            MessageKind::Acknowledgment => {
                let _ = self.deliveries.send(message);
            }
            _ => {
                if message.requires_ack {
                    let ack = Message::ack_for(&message, self.service_id.clone());
                    self.send(&ack).await?;
                }
                if !message.in_response_to.is_empty() {
                    if let Some(reply) = pending.remove(&message.in_response_to) {
                        let _ = reply.send(Ok(message));
                        return Ok(());
                    }
                }
                let _ = self.deliveries.send(message);
            }
        }
        Ok(())
    }
}
