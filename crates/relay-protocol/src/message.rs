//! The message envelope every peer and the broker exchange.
//!
//! Wire shape (one JSON object per frame):
//!
//! ```json
//! {
//!   "id": "3e0c…",
//!   "kind": "Request",
//!   "senderId": "S1",
//!   "receiverId": "S2",
//!   "inResponseTo": "",
//!   "topic": "",
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "headers": {},
//!   "payload": "{\"nested\":\"json\"}",
//!   "requiresAcknowledgment": true
//! }
//! ```
//!
//! `receiverId = ""` means broadcast.  Unknown wire fields are ignored on
//! decode; missing optional fields take their defaults.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Message kinds the broker interprets, plus opaque domain kinds.
///
/// The system set is closed; everything else deserializes as
/// [`MessageKind::Domain`] and is routed without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    ServiceRegistration,
    ServiceDiscovery,
    Acknowledgment,
    Ping,
    Error,
    Request,
    Response,
    /// Any other non-empty tag; opaque to the broker.
    Domain(String),
}

impl MessageKind {
    /// The exact tag carried on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Heartbeat => "Heartbeat",
            MessageKind::ServiceRegistration => "ServiceRegistration",
            MessageKind::ServiceDiscovery => "ServiceDiscovery",
            MessageKind::Acknowledgment => "Acknowledgment",
            MessageKind::Ping => "Ping",
            MessageKind::Error => "Error",
            MessageKind::Request => "Request",
            MessageKind::Response => "Response",
            MessageKind::Domain(tag) => tag,
        }
    }

    /// Parse a wire tag.  Returns `None` for the empty string.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "" => None,
            "Heartbeat" => Some(MessageKind::Heartbeat),
            "ServiceRegistration" => Some(MessageKind::ServiceRegistration),
            "ServiceDiscovery" => Some(MessageKind::ServiceDiscovery),
            "Acknowledgment" => Some(MessageKind::Acknowledgment),
            "Ping" => Some(MessageKind::Ping),
            "Error" => Some(MessageKind::Error),
            "Request" => Some(MessageKind::Request),
            "Response" => Some(MessageKind::Response),
            other => Some(MessageKind::Domain(other.to_owned())),
        }
    }

    /// True for the closed protocol set the broker handles itself.
    pub fn is_system(&self) -> bool {
        !matches!(self, MessageKind::Domain(_))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        MessageKind::parse(&tag).ok_or_else(|| D::Error::custom("message kind must not be empty"))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The unit of communication.
///
/// `id` is assigned by the originator and carried unchanged by the broker;
/// it identifies the message within the dedup window.  `payload` is an
/// opaque string, conventionally nested JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub sender_id: String,
    /// Empty means broadcast.
    #[serde(default)]
    pub receiver_id: String,
    /// Id of a prior message this one answers; empty when unsolicited.
    #[serde(default)]
    pub in_response_to: String,
    /// Used by pub/sub-style subscribers, not by point-to-point routing.
    #[serde(default)]
    pub topic: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payload: String,
    #[serde(default, rename = "requiresAcknowledgment")]
    pub requires_ack: bool,
}

impl Message {
    /// A fresh message with a v4 UUID id and the current UTC timestamp.
    pub fn new(kind: MessageKind, sender_id: impl Into<String>) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            kind,
            sender_id: sender_id.into(),
            receiver_id: String::new(),
            in_response_to: String::new(),
            topic: String::new(),
            timestamp: Utc::now(),
            headers: HashMap::new(),
            payload: String::new(),
            requires_ack: false,
        }
    }

    pub fn with_receiver(mut self, receiver_id: impl Into<String>) -> Self {
        self.receiver_id = receiver_id.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.in_response_to = id.into();
        self
    }

    pub fn requiring_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    /// An `Acknowledgment` answering `original`, addressed to its sender.
    pub fn ack_for(original: &Message, sender_id: impl Into<String>) -> Self {
        Message::new(MessageKind::Acknowledgment, sender_id)
            .with_receiver(original.sender_id.clone())
            .in_reply_to(original.id.clone())
    }

    /// A broker heartbeat; the payload is the RFC 3339 timestamp itself.
    pub fn heartbeat(sender_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut msg = Message::new(MessageKind::Heartbeat, sender_id);
        msg.timestamp = at;
        msg.payload = at.to_rfc3339();
        msg
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_empty()
    }

    /// Decode the payload as nested JSON.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Encode `value` as nested JSON into the payload.
    pub fn set_payload<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.payload = serde_json::to_string(value)?;
        Ok(())
    }
}
