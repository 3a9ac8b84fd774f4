use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hotline_config::TicketSettings;
use hotline_ticket::lb::LoadBalancer;
use hotline_ticket::routes::TicketState;
use hotline_ticket::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = TicketSettings::from_env()?;
    let endpoints = settings.endpoints();
    info!(
        port = settings.ticket_port,
        nodes = endpoints.len(),
        timeout_secs = settings.upstream_timeout_secs,
        "ticket proxy starting"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.upstream_timeout_secs))
        .build()?;
    let state = TicketState {
        lb: Arc::new(LoadBalancer::new(endpoints)),
        client,
    };

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.ticket_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    info!("shutting down");
    Ok(())
}
