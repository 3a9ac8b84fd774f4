use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hotline_asr::allowlist::AllowList;
use hotline_asr::preprocess::PreprocessorKind;
use hotline_asr::remote::HttpRecognizer;
use hotline_asr::worker::{Worker, run_loop};
use hotline_config::AsrSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = AsrSettings::from_env()?;
    info!(
        input = %settings.input_zmq_endpoint,
        output = %settings.output_zmq_endpoint,
        recognizer = %settings.asr_recognizer_url,
        preprocess = %settings.asr_preprocess,
        "ASR worker starting"
    );

    let allowlist = AllowList::load(Path::new(&settings.asr_allowlist_path));
    let preprocess_kind: PreprocessorKind = settings
        .asr_preprocess
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    // An unreachable recognizer is fatal; supervision restarts us.
    let backend = HttpRecognizer::new(&settings.asr_recognizer_url);
    backend.probe().await?;

    let worker = Worker::new(Arc::new(backend), allowlist, preprocess_kind);

    tokio::select! {
        result = run_loop(&settings.input_zmq_endpoint, &settings.output_zmq_endpoint, worker) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
