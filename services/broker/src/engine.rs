//! The routing engine.
//!
//! Consumes transport events, classifies each frame, answers the system
//! kinds itself, and forwards everything else by logical receiver id.
//! Every routed message is republished on the monitor stream.
//!
//! No per-message failure escapes a handler: decode errors, payload
//! errors, and send failures are logged, counted, handed to the
//! exception sink, and the loop proceeds.

use crate::config::BrokerConfig;
use crate::dedup::DedupStore;
use crate::metrics::BrokerMetrics;
use crate::pending::PendingAckStore;
use crate::registry::{RegisteredService, ServiceRegistry};
use crate::telemetry::{EventSink, ExceptionSink};
use crate::transport::{PeerHandle, Side, Transport, TransportEvent};
use chrono::Utc;
use relay_protocol::{
    DiscoveryQuery, ErrorPayload, Message, MessageKind, ServiceRegistration, codec,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub(crate) struct RoutingEngine {
    cfg: BrokerConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<ServiceRegistry>,
    dedup: Arc<DedupStore>,
    pending: Arc<PendingAckStore>,
    metrics: Arc<BrokerMetrics>,
    events: Arc<dyn EventSink>,
    exceptions: Arc<dyn ExceptionSink>,
}

impl RoutingEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: BrokerConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<ServiceRegistry>,
        dedup: Arc<DedupStore>,
        pending: Arc<PendingAckStore>,
        metrics: Arc<BrokerMetrics>,
        events: Arc<dyn EventSink>,
        exceptions: Arc<dyn ExceptionSink>,
    ) -> Arc<Self> {
        Arc::new(RoutingEngine {
            cfg,
            transport,
            registry,
            dedup,
            pending,
            metrics,
            events,
            exceptions,
        })
    }

    /// Drain transport events until cancellation.  Finishes the event in
    /// flight, flushes nothing, and exits.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                event = transport_events.recv() => {
                    match event {
                        None => break,
                        Some(event) => self.dispatch(event).await,
                    }
                }
            }
        }
        debug!("routing loop exited");
    }

    async fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { peer, side } => {
                debug!(%peer, %side, "peer session opened");
            }
            TransportEvent::PeerClosed { peer, side } => {
                if let Some(service_id) = self.registry.remove_peer(&peer).await {
                    info!(%peer, %side, service_id = %service_id, "registration removed on disconnect");
                    self.events
                        .emit("service_unregistered", &[("serviceId", service_id.as_str())]);
                } else {
                    debug!(%peer, %side, "unregistered peer disconnected");
                }
            }
            TransportEvent::Frame { peer, side, text } => {
                self.handle_frame(&peer, side, &text).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-message decision procedure
    // -----------------------------------------------------------------------

    async fn handle_frame(&self, peer: &PeerHandle, side: Side, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.mark_malformed();
                warn!(%peer, error = %e, "dropping malformed frame");
                self.exceptions
                    .emit_exception(&e, "routing", &[("peer", peer.as_str())]);
                return;
            }
        };
        self.metrics.mark_received();

        if !self.dedup.observe(&message.id) {
            self.metrics.mark_duplicate();
            match message.kind {
                // Their ack is part of the protocol; re-ack, don't re-process.
                MessageKind::Ping | MessageKind::ServiceRegistration => {
                    self.send_ack(peer, &message).await;
                }
                _ => debug!(id = %message.id, "duplicate dropped"),
            }
            return;
        }

        match message.kind {
            MessageKind::ServiceRegistration => self.handle_registration(peer, side, message).await,
            MessageKind::ServiceDiscovery => self.handle_discovery(peer, message).await,
            MessageKind::Ping => self.send_ack(peer, &message).await,
            MessageKind::Heartbeat => {
                self.registry.record_liveness(&message.sender_id).await;
            }
            MessageKind::Acknowledgment => self.handle_ack(message).await,
            _ => self.route(peer, message).await,
        }
    }

    async fn handle_registration(&self, peer: &PeerHandle, side: Side, message: Message) {
        let registration: ServiceRegistration = match message.payload_as() {
            Ok(registration) => registration,
            Err(e) => {
                self.metrics.mark_malformed();
                warn!(%peer, error = %e, "dropping registration with malformed payload");
                self.exceptions
                    .emit_exception(&e, "registration", &[("peer", peer.as_str())]);
                return;
            }
        };
        let service_id = registration.service_id.clone();
        let newly = self
            .registry
            .upsert(registration.clone(), peer.clone(), side)
            .await;
        info!(service_id = %service_id, %side, refresh = !newly, "service registered");
        self.events.emit(
            "service_registered",
            &[
                ("serviceId", service_id.as_str()),
                ("serviceType", registration.service_type.as_str()),
            ],
        );

        self.send_ack(peer, &message).await;

        // Fresh id so receiving peers do not drop it as a duplicate of
        // the original registration message.
        let mut rebroadcast =
            Message::new(MessageKind::ServiceRegistration, self.cfg.broker_id.clone());
        if let Err(e) = rebroadcast.set_payload(&registration) {
            warn!(service_id = %service_id, error = %e, "could not encode registration re-broadcast");
            return;
        }
        self.broadcast(rebroadcast).await;
    }

    async fn handle_discovery(&self, peer: &PeerHandle, message: Message) {
        let query: DiscoveryQuery = if message.payload.trim().is_empty() {
            DiscoveryQuery::default()
        } else {
            match message.payload_as() {
                Ok(query) => query,
                Err(e) => {
                    self.metrics.mark_malformed();
                    warn!(%peer, error = %e, "dropping discovery request with malformed payload");
                    return;
                }
            }
        };
        let matches = self
            .registry
            .find_matching(query.service_type.as_deref(), query.capability.as_deref())
            .await;
        debug!(
            sender = %message.sender_id,
            service_type = query.service_type.as_deref().unwrap_or(""),
            capability = query.capability.as_deref().unwrap_or(""),
            matched = matches.len(),
            "service discovery"
        );
        let mut reply = Message::new(MessageKind::Response, self.cfg.broker_id.clone())
            .with_receiver(message.sender_id.clone())
            .in_reply_to(message.id.clone());
        if let Err(e) = reply.set_payload(&matches) {
            warn!(error = %e, "could not encode discovery response");
            return;
        }
        self.send_to_peer(peer, &reply).await;
    }

    async fn handle_ack(&self, message: Message) {
        if self.pending.acknowledge(&message.in_response_to) {
            debug!(id = %message.in_response_to, "pending delivery acknowledged");
        }
        // Forward acks addressed to a peer so the original sender observes
        // the round trip; acks for the broker itself stop here.
        let receiver = message.receiver_id.clone();
        if receiver.is_empty() || receiver == self.cfg.broker_id {
            return;
        }
        if let Some(target) = self.registry.find(&receiver).await {
            self.forward(&target, &message).await;
        }
    }

    // -----------------------------------------------------------------------
    // Domain routing
    // -----------------------------------------------------------------------

    async fn route(&self, origin: &PeerHandle, message: Message) {
        if message.is_broadcast() {
            if message.requires_ack {
                // No single target to ack a broadcast; the flag is misuse.
                warn!(
                    id = %message.id,
                    sender = %message.sender_id,
                    "broadcast with requiresAcknowledgment set; acks are not tracked"
                );
            }
            self.broadcast(message).await;
            return;
        }

        match self.registry.find(&message.receiver_id).await {
            Some(target) => {
                if self.forward(&target, &message).await {
                    self.metrics.mark_routed();
                    if message.requires_ack {
                        self.pending.track(message);
                    }
                }
            }
            None => {
                self.metrics.mark_unknown_receiver();
                warn!(receiver = %message.receiver_id, id = %message.id, "unknown receiver");
                let mut reply = Message::new(MessageKind::Error, self.cfg.broker_id.clone())
                    .with_receiver(message.sender_id.clone())
                    .in_reply_to(message.id.clone());
                if let Err(e) = reply.set_payload(&ErrorPayload::unknown_receiver(&message.receiver_id))
                {
                    warn!(error = %e, "could not encode error reply");
                    return;
                }
                self.send_to_peer(origin, &reply).await;
            }
        }
    }

    /// Encode once and deliver to a registered service; publishes on the
    /// monitor on success.  A permanent send failure evicts the target's
    /// registration.
    async fn forward(&self, target: &RegisteredService, message: &Message) -> bool {
        let frame = match codec::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %message.id, error = %e, "could not encode message");
                return false;
            }
        };
        match self.transport.send(&target.peer, frame.clone()).await {
            Ok(()) => {
                let _ = self.transport.publish(frame).await;
                true
            }
            Err(e) => {
                warn!(
                    service_id = %target.registration.service_id,
                    peer = %target.peer,
                    error = %e,
                    "send failed; evicting registration"
                );
                self.registry.remove_peer(&target.peer).await;
                self.events.emit(
                    "service_evicted",
                    &[("serviceId", target.registration.service_id.as_str())],
                );
                false
            }
        }
    }

    /// Deliver to every currently-registered peer on both sides, then
    /// publish on the monitor.
    async fn broadcast(&self, message: Message) {
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %message.id, error = %e, "could not encode broadcast");
                return;
            }
        };
        for target in self.registry.snapshot().await {
            if let Err(e) = self.transport.send(&target.peer, frame.clone()).await {
                warn!(
                    service_id = %target.registration.service_id,
                    peer = %target.peer,
                    error = %e,
                    "broadcast send failed; evicting registration"
                );
                self.registry.remove_peer(&target.peer).await;
            }
        }
        self.metrics.mark_broadcast();
        let _ = self.transport.publish(frame).await;
    }

    /// Direct reply to a transport peer, bypassing the registry.  Used
    /// for acks, discovery responses, and error replies, which must reach
    /// peers that never registered.
    async fn send_to_peer(&self, peer: &PeerHandle, message: &Message) {
        match codec::encode(message) {
            Ok(frame) => {
                if let Err(e) = self.transport.send(peer, frame).await {
                    warn!(%peer, error = %e, "reply send failed");
                }
            }
            Err(e) => warn!(error = %e, "could not encode reply"),
        }
    }

    async fn send_ack(&self, peer: &PeerHandle, original: &Message) {
        let ack = Message::ack_for(original, self.cfg.broker_id.clone());
        self.send_to_peer(peer, &ack).await;
    }

    // -----------------------------------------------------------------------
    // Timer-loop entry points
    // -----------------------------------------------------------------------

    /// Broadcast one broker heartbeat.
    pub(crate) async fn emit_heartbeat(&self) {
        let heartbeat = Message::heartbeat(self.cfg.broker_id.clone(), Utc::now());
        self.broadcast(heartbeat).await;
    }

    /// Retry overdue deliveries and drop the ones out of budget.
    pub(crate) async fn sweep_pending(&self) {
        let outcome = self
            .pending
            .sweep(self.cfg.ack_deadline, self.cfg.max_retries);
        for message in outcome.retries {
            self.retransmit(message).await;
        }
        for message in outcome.expired {
            self.metrics.mark_ack_timeout();
            warn!(
                id = %message.id,
                receiver = %message.receiver_id,
                retries = self.cfg.max_retries,
                "acknowledgment timed out; giving up"
            );
            self.events.emit(
                "ack_timeout",
                &[
                    ("messageId", message.id.as_str()),
                    ("receiverId", message.receiver_id.as_str()),
                ],
            );
        }
    }

    /// Expire dedup entries older than the window.
    pub(crate) fn gc_dedup(&self) {
        let purged = self.dedup.purge_older_than(self.cfg.dedup_window);
        if purged > 0 {
            debug!(purged, "dedup entries expired");
        }
    }

    async fn retransmit(&self, message: Message) {
        match self.registry.find(&message.receiver_id).await {
            Some(target) => {
                debug!(id = %message.id, receiver = %message.receiver_id, "retransmitting");
                if self.forward(&target, &message).await {
                    self.metrics.mark_retransmission();
                }
            }
            None => {
                // Entry stays until its retries run out; the receiver may
                // re-register in the meantime.
                debug!(
                    id = %message.id,
                    receiver = %message.receiver_id,
                    "retransmission target not registered"
                );
            }
        }
    }

    pub(crate) fn heartbeat_period(&self) -> std::time::Duration {
        self.cfg.heartbeat_period
    }

    pub(crate) fn ack_sweep_interval(&self) -> std::time::Duration {
        self.cfg.ack_sweep_interval
    }

    pub(crate) fn dedup_gc_interval(&self) -> std::time::Duration {
        self.cfg.dedup_gc_interval
    }
}
