use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hotline_capture::calls::CaptureState;
use hotline_capture::publisher::SegmentPublisher;
use hotline_capture::sniffer::{self, SnifferConfig};
use hotline_capture::unix_now;
use hotline_config::CaptureSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = CaptureSettings::from_env()?;
    info!(
        iface = %settings.capture_iface,
        host_ip = %settings.host_ip,
        rtp_ports = ?(settings.rtp_port_min..=settings.rtp_port_max),
        endpoint = %settings.input_zmq_endpoint,
        threshold = settings.segment_threshold_secs,
        "capture starting"
    );

    let state = Arc::new(Mutex::new(CaptureState::new(
        settings.host_ip.clone(),
        settings.segment_threshold_secs,
        settings.call_timeout_secs as f64,
    )));

    let (tx, mut rx) = mpsc::channel(64);
    let mut publisher = SegmentPublisher::connect(&settings.input_zmq_endpoint).await?;

    let push_task = tokio::spawn(async move {
        while let Some(segment) = rx.recv().await {
            if let Err(e) = publisher.send(segment).await {
                warn!(error = %e, "segment push failed");
            }
        }
    });

    let sweep_task = {
        let state = Arc::clone(&state);
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let emitted = state.lock().sweep_timeouts(unix_now());
                for segment in emitted {
                    if tx.send(segment).await.is_err() {
                        return;
                    }
                }
            }
        })
    };

    let stats_task = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tick.tick().await;
                let (calls, streams) = {
                    let st = state.lock();
                    (st.active_calls(), st.stream_count())
                };
                debug!(active_calls = calls, streams, "capture summary");
            }
        })
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let sniffer_handle = {
        let state = Arc::clone(&state);
        let tx = tx.clone();
        let shutdown = Arc::clone(&shutdown);
        let config = SnifferConfig {
            iface: settings.capture_iface.clone(),
            rtp_port_min: settings.rtp_port_min,
            rtp_port_max: settings.rtp_port_max,
        };
        std::thread::spawn(move || sniffer::run(config, state, tx, shutdown))
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down, flushing open segments");
    shutdown.store(true, Ordering::Relaxed);
    sweep_task.abort();
    stats_task.abort();

    let remaining = state.lock().flush_all(unix_now());
    for segment in remaining {
        let _ = tx.send(segment).await;
    }
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_secs(5), push_task).await;

    // The sniffer thread exits on its next frame once the flag is up; it is
    // detached rather than joined so a quiet interface cannot hang shutdown.
    drop(sniffer_handle);
    Ok(())
}
