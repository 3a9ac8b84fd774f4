use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hotline_config::RouterSettings;
use hotline_router::ordering::PeerQueues;
use hotline_router::storage::ClientRegistry;
use hotline_router::{AppState, build_router, dispatcher, subscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = RouterSettings::from_env()?;
    let broadcast_all = settings.broadcast_all();
    info!(
        port = settings.ws_server_port,
        events = %settings.asr_events_endpoint,
        broadcast_all,
        max_delay = settings.max_delay_secs,
        "router starting"
    );

    let registry = Arc::new(ClientRegistry::new());
    let queues = Arc::new(Mutex::new(PeerQueues::new(Duration::from_secs_f64(
        settings.max_delay_secs,
    ))));

    let sub_task = tokio::spawn(subscriber::run(
        settings.asr_events_endpoint.clone(),
        Arc::clone(&registry),
        Arc::clone(&queues),
        broadcast_all,
    ));

    let state = AppState {
        registry: Arc::clone(&registry),
        events_endpoint: settings.asr_events_endpoint.clone(),
    };
    let app = build_router(state, &settings.allowed_origins());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.ws_server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("shutting down, draining heaps");
    sub_task.abort();
    let remaining = queues.lock().drain_all();
    for event in remaining {
        dispatcher::dispatch_event(&registry, &event, broadcast_all).await;
    }
    Ok(())
}
