//! The ASR worker loop: PULL segments, recognize, PUB events.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

use hotline_protocol::{AsrEvent, CallKey, EventKind, SegmentMeta};

use crate::allowlist::AllowList;
use crate::backend::AsrBackend;
use crate::error::WorkerError;
use crate::preprocess::{Preprocessor, PreprocessorKind};
use crate::resample::upsample_to_16k;

/// Per-stream progress log cadence.
const LOG_EVERY_CHUNKS: u64 = 20;

struct CallState {
    preprocessor: Preprocessor,
    chunks_seen: u64,
    bytes_seen: u64,
    last_text: String,
}

pub struct Worker {
    backend: Arc<dyn AsrBackend>,
    allowlist: AllowList,
    preprocess_kind: PreprocessorKind,
    calls: HashMap<CallKey, CallState>,
}

impl Worker {
    pub fn new(backend: Arc<dyn AsrBackend>, allowlist: AllowList, preprocess_kind: PreprocessorKind) -> Self {
        Self {
            backend,
            allowlist,
            preprocess_kind,
            calls: HashMap::new(),
        }
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Processes one multipart segment into zero or more events.
    pub async fn handle_chunk(
        &mut self,
        meta: SegmentMeta,
        pcm: &[u8],
        far_end: Option<&[u8]>,
    ) -> Vec<AsrEvent> {
        if !self.allowlist.permits(&meta.peer_ip) {
            return Vec::new();
        }

        let key = meta.key();
        let state = self.calls.entry(key.clone()).or_insert_with(|| CallState {
            preprocessor: Preprocessor::new(self.preprocess_kind),
            chunks_seen: 0,
            bytes_seen: 0,
            last_text: String::new(),
        });
        state.chunks_seen += 1;
        state.bytes_seen += pcm.len() as u64;
        if state.chunks_seen % LOG_EVERY_CHUNKS == 0 {
            debug!(
                unique_key = %key.unique_key,
                ssrc = key.ssrc,
                chunks = state.chunks_seen,
                bytes = state.bytes_seen,
                "stream progress"
            );
        }

        let mut events = Vec::new();

        let near = le_bytes_to_pcm(pcm);
        if !near.is_empty() {
            let far = far_end.map(le_bytes_to_pcm);
            let processed = state.preprocessor.process(&near, far.as_deref());

            match upsample_to_16k(&processed) {
                Ok(audio) if !audio.is_empty() => {
                    match self.backend.recognize(&audio).await {
                        Ok(result) => {
                            let text = result.text.trim().to_string();
                            if !text.is_empty() {
                                let event = AsrEvent {
                                    kind: EventKind::AsrUpdate,
                                    text: text.clone(),
                                    peer_ip: meta.peer_ip.clone(),
                                    source: meta.source,
                                    unique_key: meta.unique_key.clone(),
                                    ssrc: meta.ssrc,
                                    is_finished: false,
                                    voice_start_ts: meta.start_ts + result.vad_start_ms / 1000.0,
                                    chunk_start_ts: meta.start_ts,
                                    offset_ms: result.vad_start_ms,
                                };
                                if let Some(state) = self.calls.get_mut(&key) {
                                    state.last_text = text;
                                }
                                events.push(event);
                            }
                        }
                        Err(e) => {
                            warn!(unique_key = %key.unique_key, error = %e, "recognition failed, chunk skipped");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "resample failed, chunk skipped");
                }
            }
        }

        if meta.is_finished {
            if let Some(state) = self.calls.remove(&key) {
                let dur = state.bytes_seen as f64 / 2.0 / 8000.0;
                info!(
                    unique_key = %key.unique_key,
                    ssrc = key.ssrc,
                    chunks = state.chunks_seen,
                    bytes = state.bytes_seen,
                    duration_secs = format!("{dur:.2}"),
                    "call done"
                );
            }
            events.push(AsrEvent::finished(&key, meta.end_ts));
        }

        events
    }
}

fn le_bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Binds the PULL side, connects the PUB side, and pumps segments through
/// the worker until the process is shut down.
pub async fn run_loop(
    input_endpoint: &str,
    output_endpoint: &str,
    mut worker: Worker,
) -> Result<(), WorkerError> {
    let mut pull = zeromq::PullSocket::new();
    pull.bind(input_endpoint).await?;
    info!(endpoint = %input_endpoint, "segment PULL bound");

    // The router binds the SUB side and may come up after us.
    let mut publisher = zeromq::PubSocket::new();
    let mut attempts = 0u32;
    loop {
        match publisher.connect(output_endpoint).await {
            Ok(_) => break,
            Err(e) if attempts < 30 => {
                attempts += 1;
                warn!(endpoint = %output_endpoint, error = %e, "pub connect failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                publisher = zeromq::PubSocket::new();
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(endpoint = %output_endpoint, "event PUB connected");

    loop {
        let message = pull.recv().await?;
        let Some(meta_frame) = message.get(0) else {
            warn!("multipart message missing meta frame, dropped");
            continue;
        };
        let meta: SegmentMeta = match serde_json::from_slice(meta_frame) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "bad segment meta, dropped");
                continue;
            }
        };
        let pcm = message.get(1).map(|b| b.to_vec()).unwrap_or_default();
        let far_end = message.get(2).map(|b| b.to_vec());

        let events = worker.handle_chunk(meta, &pcm, far_end.as_deref()).await;
        for event in events {
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "event serialization failed");
                    continue;
                }
            };
            // The PUB socket is lossy by design; failures are logged only.
            if let Err(e) = publisher.send(ZmqMessage::from(Bytes::from(payload))).await {
                warn!(error = %e, "event publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Recognition;
    use async_trait::async_trait;
    use hotline_protocol::Source;
    use std::sync::Mutex;

    struct ScriptedBackend {
        responses: Mutex<Vec<anyhow::Result<Recognition>>>,
        calls: Mutex<u64>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<anyhow::Result<Recognition>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn calls_made(&self) -> u64 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AsrBackend for ScriptedBackend {
        async fn recognize(&self, _audio: &[f32]) -> anyhow::Result<Recognition> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Recognition { text: String::new(), vad_start_ms: 0.0 })
            } else {
                responses.remove(0)
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn meta(peer_ip: &str, finished: bool) -> SegmentMeta {
        SegmentMeta {
            peer_ip: peer_ip.to_string(),
            source: Source::Citizen,
            unique_key: "call-1".to_string(),
            ssrc: 42,
            start_ts: 100.0,
            end_ts: 102.0,
            is_finished: finished,
        }
    }

    fn pcm_bytes(samples: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let s = (((i * 7919) % 20000) as i32 - 10000) as i16;
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    fn worker_with(backend: Arc<ScriptedBackend>) -> Worker {
        Worker::new(backend, AllowList::allow_all(), PreprocessorKind::Bypass)
    }

    #[tokio::test]
    async fn recognized_text_becomes_an_update_event() {
        let backend = ScriptedBackend::new(vec![Ok(Recognition {
            text: "停水了".to_string(),
            vad_start_ms: 250.0,
        })]);
        let mut worker = worker_with(backend.clone());

        let events = worker.handle_chunk(meta("1.2.3.4", false), &pcm_bytes(16000), None).await;
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventKind::AsrUpdate);
        assert_eq!(e.text, "停水了");
        assert_eq!(e.chunk_start_ts, 100.0);
        assert_eq!(e.offset_ms, 250.0);
        assert!((e.voice_start_ts - 100.25).abs() < 1e-9);
        assert_eq!(e.ssrc, 42);
        assert!(!e.is_finished);
        assert_eq!(backend.calls_made(), 1);
    }

    #[tokio::test]
    async fn peers_outside_the_allowlist_are_dropped_silently() {
        let backend = ScriptedBackend::new(vec![Ok(Recognition {
            text: "should never appear".to_string(),
            vad_start_ms: 0.0,
        })]);
        let mut worker = Worker::new(
            backend.clone(),
            AllowList::from_ips(&["192.168.10.19"]),
            PreprocessorKind::Bypass,
        );

        let events = worker.handle_chunk(meta("8.8.8.8", true), &pcm_bytes(16000), None).await;
        assert!(events.is_empty());
        assert_eq!(backend.calls_made(), 0);

        let events = worker.handle_chunk(meta("192.168.10.19", false), &pcm_bytes(16000), None).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn empty_text_produces_no_event() {
        let backend = ScriptedBackend::new(vec![Ok(Recognition {
            text: "   ".to_string(),
            vad_start_ms: 0.0,
        })]);
        let mut worker = worker_with(backend);
        let events = worker.handle_chunk(meta("1.2.3.4", false), &pcm_bytes(16000), None).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn recognition_failure_skips_the_chunk_but_not_the_call() {
        let backend = ScriptedBackend::new(vec![
            Err(anyhow::anyhow!("inference blew up")),
            Ok(Recognition { text: "ok".to_string(), vad_start_ms: 0.0 }),
        ]);
        let mut worker = worker_with(backend);

        let events = worker.handle_chunk(meta("1.2.3.4", false), &pcm_bytes(16000), None).await;
        assert!(events.is_empty());
        let events = worker.handle_chunk(meta("1.2.3.4", false), &pcm_bytes(16000), None).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn finished_chunk_emits_text_then_call_finished_and_resets() {
        let backend = ScriptedBackend::new(vec![Ok(Recognition {
            text: "最后一句".to_string(),
            vad_start_ms: 100.0,
        })]);
        let mut worker = worker_with(backend);

        let events = worker.handle_chunk(meta("1.2.3.4", true), &pcm_bytes(16000), None).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::AsrUpdate);
        assert_eq!(events[1].kind, EventKind::CallFinished);
        assert!(events[1].is_finished);
        assert!(events[1].text.is_empty());
        assert_eq!(events[1].unique_key, "call-1");
        assert_eq!(worker.active_calls(), 0);
    }

    #[tokio::test]
    async fn bare_terminal_marker_yields_only_call_finished() {
        let backend = ScriptedBackend::new(vec![]);
        let mut worker = worker_with(backend.clone());

        let events = worker.handle_chunk(meta("1.2.3.4", true), &[], None).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CallFinished);
        assert_eq!(backend.calls_made(), 0);
    }

    #[test]
    fn le_decoding_matches_byte_layout() {
        assert_eq!(le_bytes_to_pcm(&[0x02, 0x01, 0xFE, 0xFF]), vec![0x0102, -2]);
    }
}
