// relay-protocol: broker wire protocol types and serialization.
//
// Every frame on the wire is a single UTF-8 JSON object with a top-level
// `kind` field.  System kinds and their payload shapes are frozen; any
// other kind string is a domain kind the broker routes without
// interpretation.

pub mod codec;
pub mod message;
pub mod payloads;

pub use codec::{CodecError, decode, encode};
pub use message::{Message, MessageKind};
pub use payloads::{DiscoveryQuery, ErrorPayload, ServiceRegistration, error_codes};
