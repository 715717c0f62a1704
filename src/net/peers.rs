// Known-peer registry: a mutex-guarded list of node ids, deduplicated by
// ip. Reads hand out point-in-time snapshots.

use std::sync::Mutex;

use crate::net::protocol::NodeId;

#[derive(Default)]
pub struct KnownPeers {
    peers: Mutex<Vec<NodeId>>,
}

impl KnownPeers {
    pub fn new() -> Self {
        KnownPeers::default()
    }

    /// Append peers not yet known by ip.
    pub fn append<I: IntoIterator<Item = NodeId>>(&self, ids: I) {
        let mut peers = self.peers.lock().expect("peer registry mutex poisoned");
        for id in ids {
            if !peers.iter().any(|p| p.ip == id.ip) {
                peers.push(id);
            }
        }
    }

    pub fn remove_by_ip(&self, ip: &str) {
        let mut peers = self.peers.lock().expect("peer registry mutex poisoned");
        peers.retain(|p| p.ip != ip);
    }

    pub fn contains_ip(&self, ip: &str) -> bool {
        self.peers
            .lock()
            .expect("peer registry mutex poisoned")
            .iter()
            .any(|p| p.ip == ip)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.peers
            .lock()
            .expect("peer registry mutex poisoned")
            .first()
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<NodeId> {
        self.peers
            .lock()
            .expect("peer registry mutex poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("peer registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
