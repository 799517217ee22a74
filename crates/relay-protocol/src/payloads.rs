//! Frozen payload shapes for the system message kinds.
//!
//! These are carried as nested JSON inside [`Message::payload`]
//! (see [`Message::payload_as`] / [`Message::set_payload`]).
//!
//! [`Message::payload`]: crate::message::Message
//! [`Message::payload_as`]: crate::message::Message::payload_as
//! [`Message::set_payload`]: crate::message::Message::set_payload

use serde::{Deserialize, Serialize};

/// Payload of a `ServiceRegistration` message.
///
/// The broker owns the record once accepted; re-sending it is an
/// idempotent refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub service_id: String,
    pub service_name: String,
    pub service_type: String,
    /// Set semantics; order carries no meaning.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_port: Option<u16>,
}

impl ServiceRegistration {
    pub fn new(
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        service_type: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        ServiceRegistration {
            service_id: service_id.into(),
            service_name: service_name.into(),
            service_type: service_type.into(),
            capabilities,
            endpoint: None,
            publisher_port: None,
            subscriber_port: None,
        }
    }

    /// Type comparison is case-insensitive.
    pub fn is_type(&self, service_type: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
    }

    /// Capability comparison is case-sensitive.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Payload of a `ServiceDiscovery` request.
///
/// An absent or empty criterion matches all; the response payload is a
/// JSON array of the matching [`ServiceRegistration`] records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

/// Frozen broker error codes.
pub mod error_codes {
    /// Routing target not present in the registry.
    pub const UNKNOWN_RECEIVER: u16 = 404;
}

/// Payload of an `Error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorPayload {
    pub fn unknown_receiver(receiver_id: &str) -> Self {
        ErrorPayload {
            error_code: error_codes::UNKNOWN_RECEIVER,
            message: format!("Unknown service: {receiver_id}"),
            details: None,
        }
    }
}
