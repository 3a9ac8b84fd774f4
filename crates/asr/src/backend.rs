//! Pluggable recognizer seam.

use async_trait::async_trait;

/// Result of recognizing one audio chunk.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    /// Offset of the first voice activity inside the chunk, in milliseconds,
    /// as reported by the recognizer's VAD.
    pub vad_start_ms: f64,
}

/// A speech recognizer: 16 kHz mono f32 samples in, text plus VAD timing out.
#[async_trait]
pub trait AsrBackend: Send + Sync + 'static {
    async fn recognize(&self, audio_16k: &[f32]) -> anyhow::Result<Recognition>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}
