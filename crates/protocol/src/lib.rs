//! Wire types shared by the capture, ASR, router and ticket components.
//!
//! Everything here crosses a process boundary (ZeroMQ frame, WebSocket
//! message or HTTP body), so field names are part of the deployed protocol
//! and must not change without coordinating all four binaries.

use serde::{Deserialize, Serialize};

/// Which leg of a two-party hotline conversation audio belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Citizen,
    HotLine,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Citizen => write!(f, "citizen"),
            Source::HotLine => write!(f, "hot-line"),
        }
    }
}

/// Identity of a single RTP stream within a dialog.
///
/// Both legs of a call share `unique_key` (derived from the SIP Call-ID)
/// but differ in `source` and `ssrc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey {
    pub peer_ip: String,
    pub source: Source,
    pub unique_key: String,
    pub ssrc: u32,
}

/// Metadata frame preceding the PCM payload on the capture → ASR hop.
///
/// Serialized as the first part of a ZeroMQ multipart message; the second
/// part is signed 16-bit little-endian mono 8 kHz PCM, the optional third
/// part is far-end reference PCM for echo cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub peer_ip: String,
    pub source: Source,
    pub unique_key: String,
    pub ssrc: u32,
    /// Wall-clock seconds when the first packet of this chunk was captured.
    pub start_ts: f64,
    /// Wall-clock seconds when the last packet of this chunk was captured.
    pub end_ts: f64,
    /// True only for the terminal chunk of a call.
    #[serde(rename = "IsFinished")]
    pub is_finished: bool,
}

impl SegmentMeta {
    pub fn key(&self) -> CallKey {
        CallKey {
            peer_ip: self.peer_ip.clone(),
            source: self.source,
            unique_key: self.unique_key.clone(),
            ssrc: self.ssrc,
        }
    }
}

/// Discriminator for events on the ASR → router hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AsrUpdate,
    CallFinished,
}

/// A recognized-text (or end-of-call) event published by the ASR worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub text: String,
    pub peer_ip: String,
    pub source: Source,
    pub unique_key: String,
    pub ssrc: u32,
    pub is_finished: bool,
    /// `chunk_start_ts + offset_ms / 1000`: when the speaker actually
    /// started talking, as reported by the recognizer's VAD.
    pub voice_start_ts: f64,
    pub chunk_start_ts: f64,
    pub offset_ms: f64,
}

impl AsrEvent {
    pub fn key(&self) -> CallKey {
        CallKey {
            peer_ip: self.peer_ip.clone(),
            source: self.source,
            unique_key: self.unique_key.clone(),
            ssrc: self.ssrc,
        }
    }

    /// End-of-call marker carrying the identity tuple and no text.
    pub fn finished(key: &CallKey, chunk_start_ts: f64) -> Self {
        Self {
            kind: EventKind::CallFinished,
            text: String::new(),
            peer_ip: key.peer_ip.clone(),
            source: key.source,
            unique_key: key.unique_key.clone(),
            ssrc: key.ssrc,
            is_finished: true,
            voice_start_ts: chunk_start_ts,
            chunk_start_ts,
            offset_ms: 0.0,
        }
    }
}

/// Messages the router sends to `/listening` WebSocket clients, besides
/// the `AsrEvent`s themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ServerHeartbeat { ts: String },
    Pong { ts: String },
    Stopped { ts: String },
}

/// Messages `/listening` clients may send to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    StopListening,
}

/// ISO-8601 UTC timestamp used in WebSocket frames and health responses.
pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
