//! ASR event subscriber: SUB socket in, ordered WebSocket fan-out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};
use zeromq::{Socket, SocketRecv};

use hotline_protocol::AsrEvent;

use crate::error::RouterError;
use crate::ordering::PeerQueues;
use crate::storage::ClientRegistry;

/// Cadence of the fairness check when no events arrive.
const DRAIN_TICK: Duration = Duration::from_millis(50);

/// Runs the subscriber with restart-on-crash semantics: a transport failure
/// tears the socket down and starts over from bind.
pub async fn run(
    endpoint: String,
    registry: Arc<ClientRegistry>,
    queues: Arc<Mutex<PeerQueues>>,
    broadcast_all: bool,
) {
    loop {
        match consume(&endpoint, &registry, &queues, broadcast_all).await {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %e, "subscriber failed, restarting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn consume(
    endpoint: &str,
    registry: &ClientRegistry,
    queues: &Mutex<PeerQueues>,
    broadcast_all: bool,
) -> Result<(), RouterError> {
    let mut sub = zeromq::SubSocket::new();
    sub.bind(endpoint).await?;
    sub.subscribe("").await?;
    info!(%endpoint, broadcast_all, "event SUB bound");

    let mut tick = tokio::time::interval(DRAIN_TICK);
    loop {
        let ready = tokio::select! {
            message = sub.recv() => {
                let message = message?;
                let Some(frame) = message.get(0) else { continue };
                let event: AsrEvent = match serde_json::from_slice(frame) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "malformed ASR event dropped");
                        continue;
                    }
                };
                queues.lock().on_event(event, Instant::now())
            }
            _ = tick.tick() => {
                queues.lock().tick(Instant::now())
            }
        };

        for event in ready {
            crate::dispatcher::dispatch_event(registry, &event, broadcast_all).await;
        }
    }
}
