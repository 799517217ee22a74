//! Injected telemetry sinks.
//!
//! The broker never talks to an exporter directly; it emits one-line
//! events and exceptions through these interfaces, injected at
//! construction.  Both default to no-ops.

use std::error::Error;

/// Receives named events with string attributes.
pub trait EventSink: Send + Sync {
    fn emit(&self, name: &str, attributes: &[(&str, &str)]);
}

/// Receives contained errors together with the component that caught them.
pub trait ExceptionSink: Send + Sync {
    fn emit_exception(&self, error: &dyn Error, component: &str, attributes: &[(&str, &str)]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl EventSink for NoopTelemetry {
    fn emit(&self, _name: &str, _attributes: &[(&str, &str)]) {}
}

impl ExceptionSink for NoopTelemetry {
    fn emit_exception(&self, _error: &dyn Error, _component: &str, _attributes: &[(&str, &str)]) {}
}
