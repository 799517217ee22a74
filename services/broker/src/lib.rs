//! Centralized message broker.
//!
//! Routes JSON messages between connected peers by logical service id,
//! maintains a registry of live services queryable by type and
//! capability, deduplicates retransmissions, retries unacknowledged
//! deliveries, and republishes every routed message on a publish-only
//! monitor stream.
//!
//! # Topology
//!
//! ```text
//!   clients ──frontend──┐
//!                       ├── routing engine ── timer loop
//!   services ──backend──┘         │
//!                                 └──monitor──▶ passive observers
//! ```
//!
//! Construct a [`Broker`] from a [`BrokerConfig`]; the TCP transport is
//! the default, the in-process channel transport is selected through
//! [`Broker::start_with_transport`].

pub mod config;
pub mod dedup;
pub mod lifecycle;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod telemetry;
pub mod transport;

mod engine;
mod timers;

pub use config::{BrokerConfig, ConfigError};
pub use lifecycle::{Broker, BrokerError};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use telemetry::{EventSink, ExceptionSink, NoopTelemetry};
