//! Registry of connected `/listening` WebSocket clients.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

#[derive(Clone)]
pub struct ClientEntry {
    pub sender: WsSender,
    /// Source IP recorded at accept time; routing key for targeted mode.
    pub peer_ip: String,
}

/// Tracks active clients by connection id. Mutated by the accept path, the
/// per-client receive task and the router's eviction path.
pub struct ClientRegistry {
    clients: DashMap<String, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { clients: DashMap::new() }
    }

    pub fn add(&self, client_id: String, sender: WsSender, peer_ip: String) {
        self.clients.insert(client_id, ClientEntry { sender, peer_ip });
    }

    pub fn remove(&self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Clients an event for `peer_ip` should reach: everyone in broadcast
    /// mode, IP-matched clients otherwise.
    pub fn targets(&self, peer_ip: &str, broadcast_all: bool) -> Vec<(String, ClientEntry)> {
        self.clients
            .iter()
            .filter(|entry| broadcast_all || entry.value().peer_ip == peer_ip)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
