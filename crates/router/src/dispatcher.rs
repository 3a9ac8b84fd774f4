//! Fan-out of ordered events to WebSocket clients.

use axum::extract::ws::Message;
use futures::SinkExt;
use tracing::{debug, warn};

use hotline_protocol::AsrEvent;

use crate::storage::{ClientRegistry, WsSender};

/// Sends one JSON payload to a single client's socket.
pub async fn send_text(sender: &WsSender, text: String) -> Result<(), axum::Error> {
    let mut guard = sender.lock().await;
    guard.send(Message::text(text)).await
}

/// Delivers an event to its target set. Clients whose send fails are
/// evicted; delivery continues to the remaining targets.
pub async fn dispatch_event(registry: &ClientRegistry, event: &AsrEvent, broadcast_all: bool) {
    let targets = registry.targets(&event.peer_ip, broadcast_all);
    if targets.is_empty() {
        debug!(peer_ip = %event.peer_ip, kind = ?event.kind, "no target clients for event");
        return;
    }

    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "event serialization failed");
            return;
        }
    };

    for (client_id, entry) in targets {
        if let Err(e) = send_text(&entry.sender, text.clone()).await {
            warn!(%client_id, error = %e, "send failed, evicting client");
            registry.remove(&client_id);
        }
    }
}
