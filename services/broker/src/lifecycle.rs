//! Broker construction and orderly shutdown.
//!
//! One broker value is created by the program entry point and passed
//! around; tests create fresh instances per case.  Startup binds all
//! three endpoints or fails; shutdown flips a root cancellation watch,
//! waits out the grace period, and abandons anything still running.

use crate::config::BrokerConfig;
use crate::dedup::DedupStore;
use crate::engine::RoutingEngine;
use crate::metrics::{BrokerMetrics, MetricsSnapshot};
use crate::pending::PendingAckStore;
use crate::registry::ServiceRegistry;
use crate::telemetry::{EventSink, ExceptionSink, NoopTelemetry};
use crate::timers;
use crate::transport::tcp::{BindError, TcpTransport};
use crate::transport::{Transport, TransportEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Depth of the transport → engine event channel.
const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("shutdown exceeded the grace period; {abandoned} task(s) abandoned")]
    ShutdownTimeout { abandoned: usize },
}

/// A running broker.
pub struct Broker {
    cfg: BrokerConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<ServiceRegistry>,
    dedup: Arc<DedupStore>,
    pending: Arc<PendingAckStore>,
    metrics: Arc<BrokerMetrics>,
    events: Arc<dyn EventSink>,
    shutdown_tx: watch::Sender<bool>,
    routing_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
    frontend_addr: Option<SocketAddr>,
    backend_addr: Option<SocketAddr>,
    monitor_addr: Option<SocketAddr>,
}

impl Broker {
    /// Bind the TCP transport and start routing, with no-op telemetry.
    pub async fn start(cfg: BrokerConfig) -> Result<Self, BrokerError> {
        let noop = Arc::new(NoopTelemetry);
        Self::start_with_telemetry(cfg, noop.clone(), noop).await
    }

    /// Bind the TCP transport and start routing.
    pub async fn start_with_telemetry(
        cfg: BrokerConfig,
        events: Arc<dyn EventSink>,
        exceptions: Arc<dyn ExceptionSink>,
    ) -> Result<Self, BrokerError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let transport = TcpTransport::bind(
            &cfg.bind_addr,
            cfg.frontend_port,
            cfg.backend_port,
            cfg.monitor_port,
            event_tx,
        )
        .await?;
        let (frontend, backend, monitor) = (
            transport.frontend_addr(),
            transport.backend_addr(),
            transport.monitor_addr(),
        );
        info!(
            broker_id = %cfg.broker_id,
            %frontend,
            %backend,
            %monitor,
            "broker listening"
        );
        let mut broker = Self::start_with_transport(cfg, transport, event_rx, events, exceptions);
        broker.frontend_addr = Some(frontend);
        broker.backend_addr = Some(backend);
        broker.monitor_addr = Some(monitor);
        Ok(broker)
    }

    /// Start routing over an already-constructed transport (e.g. the
    /// in-process channel transport).  `transport_events` must be the
    /// receiving end of the channel the transport reports into.
    pub fn start_with_transport(
        cfg: BrokerConfig,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        events: Arc<dyn EventSink>,
        exceptions: Arc<dyn ExceptionSink>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let dedup = Arc::new(DedupStore::new());
        let pending = Arc::new(PendingAckStore::new());
        let metrics = Arc::new(BrokerMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = RoutingEngine::new(
            cfg.clone(),
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&dedup),
            Arc::clone(&pending),
            Arc::clone(&metrics),
            Arc::clone(&events),
            exceptions,
        );
        let routing_task = tokio::spawn(
            Arc::clone(&engine).run(transport_events, shutdown_rx.clone()),
        );
        let timer_task = tokio::spawn(timers::run(engine, shutdown_rx));

        events.emit("broker_started", &[("brokerId", cfg.broker_id.as_str())]);
        Broker {
            cfg,
            transport,
            registry,
            dedup,
            pending,
            metrics,
            events,
            shutdown_tx,
            routing_task,
            timer_task,
            frontend_addr: None,
            backend_addr: None,
            monitor_addr: None,
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.cfg.broker_id
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.cfg
    }

    /// Bound frontend address; `None` for non-TCP transports.
    pub fn frontend_addr(&self) -> Option<SocketAddr> {
        self.frontend_addr
    }

    pub fn backend_addr(&self) -> Option<SocketAddr> {
        self.backend_addr
    }

    pub fn monitor_addr(&self) -> Option<SocketAddr> {
        self.monitor_addr
    }

    /// Number of currently-registered services.
    pub async fn service_count(&self) -> usize {
        self.registry.service_count().await
    }

    /// Number of deliveries still awaiting acknowledgment.
    pub fn pending_ack_count(&self) -> usize {
        self.pending.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cooperative shutdown: cancel every loop, close the transport,
    /// clear all state.  Loops still running after the grace period are
    /// aborted and reported.
    pub async fn shutdown(self) -> Result<(), BrokerError> {
        info!(broker_id = %self.cfg.broker_id, "broker shutting down");
        let _ = self.shutdown_tx.send(true);
        self.transport.shutdown();

        let deadline = tokio::time::Instant::now() + self.cfg.shutdown_grace;
        let mut abandoned = 0usize;
        for (name, mut task) in [("routing", self.routing_task), ("timer", self.timer_task)] {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "did not stop within the grace period; abandoning");
                    task.abort();
                    abandoned += 1;
                }
            }
        }

        self.registry.clear().await;
        self.dedup.clear();
        self.pending.clear();
        self.events
            .emit("broker_stopped", &[("brokerId", self.cfg.broker_id.as_str())]);

        if abandoned > 0 {
            Err(BrokerError::ShutdownTimeout { abandoned })
        } else {
            Ok(())
        }
    }
}
