//! Live service registry.
//!
//! Maps logical service ids to their registration records and transport
//! peers, with a reverse peer → service map kept by the routing engine.
//! Entries live until the peer's transport session ends or the broker
//! shuts down.

use crate::transport::{PeerHandle, Side};
use chrono::{DateTime, Utc};
use relay_protocol::ServiceRegistration;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A registration bound to its transport session.
#[derive(Debug, Clone)]
pub struct RegisteredService {
    pub registration: ServiceRegistration,
    pub peer: PeerHandle,
    pub side: Side,
    pub registered_at: DateTime<Utc>,
    /// Refreshed by peer heartbeats.
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, RegisteredService>>,
    peers: RwLock<HashMap<PeerHandle, String>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a registration and bind `peer` to its service
    /// id.  Returns `true` when the service id was not registered before.
    pub async fn upsert(
        &self,
        registration: ServiceRegistration,
        peer: PeerHandle,
        side: Side,
    ) -> bool {
        let service_id = registration.service_id.clone();
        let now = Utc::now();
        let mut services = self.services.write().await;
        let mut peers = self.peers.write().await;
        let previous = services.insert(
            service_id.clone(),
            RegisteredService {
                registration,
                peer: peer.clone(),
                side,
                registered_at: now,
                last_seen: now,
            },
        );
        if let Some(previous) = &previous {
            // Same service re-registering from a new session: unbind the
            // old peer so its disconnect cannot evict the fresh entry.
            if previous.peer != peer {
                peers.remove(&previous.peer);
            }
        }
        peers.insert(peer, service_id);
        previous.is_none()
    }

    pub async fn remove(&self, service_id: &str) -> Option<RegisteredService> {
        let mut services = self.services.write().await;
        let mut peers = self.peers.write().await;
        let removed = services.remove(service_id);
        if let Some(removed) = &removed {
            peers.remove(&removed.peer);
        }
        removed
    }

    /// Remove whatever service is bound to `peer`; returns its id.
    pub async fn remove_peer(&self, peer: &PeerHandle) -> Option<String> {
        let mut services = self.services.write().await;
        let mut peers = self.peers.write().await;
        let service_id = peers.remove(peer)?;
        services.remove(&service_id);
        Some(service_id)
    }

    pub async fn find(&self, service_id: &str) -> Option<RegisteredService> {
        self.services.read().await.get(service_id).cloned()
    }

    pub async fn service_for_peer(&self, peer: &PeerHandle) -> Option<String> {
        self.peers.read().await.get(peer).cloned()
    }

    /// Registrations matching both criteria; an empty or absent criterion
    /// matches all.  Type comparison is case-insensitive, capability
    /// comparison case-sensitive.
    pub async fn find_matching(
        &self,
        service_type: Option<&str>,
        capability: Option<&str>,
    ) -> Vec<ServiceRegistration> {
        let type_filter = service_type.filter(|t| !t.is_empty());
        let capability_filter = capability.filter(|c| !c.is_empty());
        let services = self.services.read().await;
        let mut matches: Vec<ServiceRegistration> = services
            .values()
            .filter(|s| type_filter.is_none_or(|t| s.registration.is_type(t)))
            .filter(|s| capability_filter.is_none_or(|c| s.registration.has_capability(c)))
            .map(|s| s.registration.clone())
            .collect();
        matches.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        matches
    }

    pub async fn find_by_type(&self, service_type: &str) -> Vec<ServiceRegistration> {
        self.find_matching(Some(service_type), None).await
    }

    pub async fn find_by_capability(&self, capability: &str) -> Vec<ServiceRegistration> {
        self.find_matching(None, Some(capability)).await
    }

    /// Consistent copy of every live entry.
    pub async fn snapshot(&self) -> Vec<RegisteredService> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn service_count(&self) -> usize {
        self.services.read().await.len()
    }

    /// Refresh `last_seen`; `false` when the sender is not registered.
    pub async fn record_liveness(&self, service_id: &str) -> bool {
        match self.services.write().await.get_mut(service_id) {
            Some(service) => {
                service.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn clear(&self) {
        self.services.write().await.clear();
        self.peers.write().await.clear();
    }
}
