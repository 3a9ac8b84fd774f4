//! HTTP recognizer backend.
//!
//! Posts signed 16-bit LE 16 kHz PCM to the recognizer service and expects
//! `{text, vad_start_ms}` back. The startup probe makes an unreachable
//! recognizer fatal, matching the treat-model-load-failure-as-fatal policy.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::backend::{AsrBackend, Recognition};

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
    #[serde(default)]
    vad_start_ms: f64,
}

impl HttpRecognizer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Startup health probe; an error here aborts the worker.
    pub async fn probe(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("recognizer unreachable at {url}: {e}"))?;
        if !response.status().is_success() {
            anyhow::bail!("recognizer at {url} returned {}", response.status());
        }
        info!(recognizer = %self.base_url, "recognizer healthy");
        Ok(())
    }

    fn pcm_f32_to_s16le(samples: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let s16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            bytes.extend_from_slice(&s16.to_le_bytes());
        }
        bytes
    }
}

#[async_trait]
impl AsrBackend for HttpRecognizer {
    async fn recognize(&self, audio_16k: &[f32]) -> anyhow::Result<Recognition> {
        let url = format!("{}/recognize", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .header("x-sample-rate", "16000")
            .body(Self::pcm_f32_to_s16le(audio_16k))
            .send()
            .await?
            .error_for_status()?;
        let parsed: RecognizeResponse = response.json().await?;
        Ok(Recognition {
            text: parsed.text,
            vad_start_ms: parsed.vad_start_ms,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_conversion_clamps_and_scales() {
        let bytes = HttpRecognizer::pcm_f32_to_s16le(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        let s: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(s[0], 0);
        assert_eq!(s[1], 32767);
        assert_eq!(s[2], -32767);
        assert_eq!(s[3], 32767);
    }
}
