// relay-client: peer-side counterpart of the broker protocol.
//
// Connects, registers, answers heartbeats and pings, correlates
// request/response pairs, and keeps a cache of peers learned from
// broadcast registrations.

pub mod client;
pub mod peer_cache;

pub use client::{Client, ClientConfig, ClientError};
pub use peer_cache::PeerCache;
