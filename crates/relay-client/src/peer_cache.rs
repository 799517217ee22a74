//! Cache of peers learned from broadcast registrations.

use relay_protocol::ServiceRegistration;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PeerCache {
    peers: Mutex<HashMap<String, ServiceRegistration>>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh; keyed by service id.
    pub fn insert(&self, registration: ServiceRegistration) {
        self.peers
            .lock()
            .unwrap()
            .insert(registration.service_id.clone(), registration);
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.peers.lock().unwrap().get(service_id).cloned()
    }

    pub fn remove(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.peers.lock().unwrap().remove(service_id)
    }

    /// All known peers, ordered by service id.
    pub fn all(&self) -> Vec<ServiceRegistration> {
        let mut peers: Vec<ServiceRegistration> =
            self.peers.lock().unwrap().values().cloned().collect();
        peers.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
