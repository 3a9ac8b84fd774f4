//! The `/listening` WebSocket endpoint: accept, heartbeat, client control
//! messages, cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hotline_protocol::{ClientFrame, ServerFrame, iso_now};

use crate::AppState;
use crate::dispatcher::send_text;
use crate::storage::WsSender;

/// Receive poll window; keeps shutdown and eviction observable while the
/// client is quiet.
const RECV_POLL: Duration = Duration::from_secs(2);

/// Guard that aborts a spawned task when dropped.
///
/// `tokio::spawn` returns a `JoinHandle` whose `Drop` impl detaches (does
/// NOT abort) the task, so the heartbeat must be cancelled explicitly.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let peer_ip = client_ip(&headers, addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer_ip))
}

/// First non-empty forwarding header wins, leftmost entry; the socket
/// address is the fallback.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    for header in ["x-forwarded-for", "x-real-ip", "x-client-ip"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    addr.ip().to_string()
}

async fn handle_socket(socket: WebSocket, state: AppState, peer_ip: String) {
    let client_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    info!(%client_id, %peer_ip, total = state.registry.count() + 1, "client connected");

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));
    state.registry.add(client_id.clone(), sender.clone(), peer_ip.clone());

    let heartbeat = {
        let sender = sender.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let frame = ServerFrame::ServerHeartbeat { ts: iso_now() };
                let Ok(text) = serde_json::to_string(&frame) else { break };
                if send_text(&sender, text).await.is_err() {
                    break;
                }
            }
        })
    };
    let _heartbeat_guard = AbortOnDrop(heartbeat);

    loop {
        let msg = match tokio::time::timeout(RECV_POLL, receiver.next()).await {
            Err(_) => {
                // Quiet client; leave if the dispatcher evicted us.
                if !state.registry.contains(&client_id) {
                    break;
                }
                continue;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(%client_id, error = %e, "client receive error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    continue;
                };
                match frame {
                    ClientFrame::Ping => {
                        debug!(%client_id, "client ping");
                        let pong = ServerFrame::Pong { ts: iso_now() };
                        if let Ok(text) = serde_json::to_string(&pong) {
                            let _ = send_text(&sender, text).await;
                        }
                    }
                    ClientFrame::StopListening => {
                        let stopped = ServerFrame::Stopped { ts: iso_now() };
                        if let Ok(text) = serde_json::to_string(&stopped) {
                            let _ = send_text(&sender, text).await;
                        }
                        break;
                    }
                }
            }
            Message::Ping(data) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.remove(&client_id);
    info!(%client_id, %peer_ip, remaining = state.registry.count(), "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    fn addr() -> SocketAddr {
        "10.9.8.7:4242".parse().unwrap()
    }

    #[test]
    fn forwarded_for_takes_the_leftmost_entry() {
        let h = headers(&[("x-forwarded-for", "192.168.10.19, 10.0.0.1")]);
        assert_eq!(client_ip(&h, addr()), "192.168.10.19");
    }

    #[test]
    fn real_ip_is_used_when_forwarded_for_is_absent() {
        let h = headers(&[("x-real-ip", "172.16.0.9")]);
        assert_eq!(client_ip(&h, addr()), "172.16.0.9");
    }

    #[test]
    fn empty_headers_fall_back_to_the_socket_address() {
        let h = headers(&[("x-forwarded-for", "  ")]);
        assert_eq!(client_ip(&h, addr()), "10.9.8.7");
    }
}
