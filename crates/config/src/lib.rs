//! Environment-driven settings for the four pipeline binaries.
//!
//! Every component reads its settings once at startup. Variable names match
//! the deployed environment (`INPUT_ZMQ_ENDPOINT`, `WS_BROADCAST_ALL`, …);
//! a `.env` file is honored via dotenvy when present.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
    // Load .env before reading the environment; missing file is fine.
    let _ = dotenvy::dotenv();
    config::Config::builder()
}

fn truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings for the capture & reassembly process.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    /// Interface to sniff (AF_PACKET).
    pub capture_iface: String,
    /// IP of this host; INVITEs originating here are incoming calls and
    /// RTP originating here belongs to the hot-line leg.
    pub host_ip: String,
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
    /// Segment flush threshold in seconds of accumulated audio.
    pub segment_threshold_secs: f64,
    /// Seconds without packets before a dialog is declared dead.
    pub call_timeout_secs: u64,
    /// PUSH endpoint of the ASR worker's PULL socket.
    pub input_zmq_endpoint: String,
}

impl CaptureSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let cfg = builder()
            .set_default("capture_iface", "eth0")?
            .set_default("host_ip", "127.0.0.1")?
            .set_default("rtp_port_min", 10000)?
            .set_default("rtp_port_max", 20000)?
            .set_default("segment_threshold_secs", 2.0)?
            .set_default("call_timeout_secs", 30)?
            .set_default("input_zmq_endpoint", "tcp://127.0.0.1:5555")?
            .add_source(config::Environment::default())
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

/// Settings for the ASR worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct AsrSettings {
    /// PULL bind address receiving capture segments.
    pub input_zmq_endpoint: String,
    /// PUB endpoint; connects to the router's SUB bind.
    pub output_zmq_endpoint: String,
    /// One permitted peer IP per line; empty or missing allows all.
    pub asr_allowlist_path: String,
    /// HTTP recognizer base URL.
    pub asr_recognizer_url: String,
    /// Pre-processing backend: "aec", "noise-gate" or "bypass".
    pub asr_preprocess: String,
}

impl AsrSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let cfg = builder()
            .set_default("input_zmq_endpoint", "tcp://0.0.0.0:5555")?
            .set_default("output_zmq_endpoint", "tcp://127.0.0.1:5557")?
            .set_default("asr_allowlist_path", "ip_allowlist.txt")?
            .set_default("asr_recognizer_url", "http://127.0.0.1:8000")?
            .set_default("asr_preprocess", "noise-gate")?
            .add_source(config::Environment::default())
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

/// Settings for the event-router / WebSocket process.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSettings {
    /// SUB bind address receiving ASR events.
    pub asr_events_endpoint: String,
    pub ws_server_port: u16,
    /// "1"/"true"/"yes"/"on" → broadcast every event to every client.
    pub ws_broadcast_all: String,
    /// Comma-separated CORS origins, "*" for any.
    pub ws_allowed_origins: String,
    /// Fairness bound before out-of-order publication is forced.
    pub max_delay_secs: f64,
}

impl RouterSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let cfg = builder()
            .set_default("asr_events_endpoint", "tcp://0.0.0.0:5557")?
            .set_default("ws_server_port", 8000)?
            .set_default("ws_broadcast_all", "0")?
            .set_default("ws_allowed_origins", "*")?
            .set_default("max_delay_secs", 5.0)?
            .add_source(config::Environment::default())
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn broadcast_all(&self) -> bool {
        truthy(&self.ws_broadcast_all)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        let origins = split_csv(&self.ws_allowed_origins);
        if origins.is_empty() { vec!["*".to_string()] } else { origins }
    }
}

/// Settings for the ticket proxy process.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketSettings {
    pub ticket_port: u16,
    /// Single upstream summarizer URL; used when the pool is empty.
    pub ticket_infer_url: String,
    /// Comma-separated LLM pool; takes precedence over `ticket_infer_url`.
    pub deepseek_endpoints: String,
    pub upstream_timeout_secs: u64,
}

impl TicketSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let cfg = builder()
            .set_default("ticket_port", 8002)?
            .set_default("ticket_infer_url", "http://127.0.0.1:8001/summarize")?
            .set_default("deepseek_endpoints", "")?
            .set_default("upstream_timeout_secs", 20)?
            .add_source(config::Environment::default())
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// The upstream pool: the comma-separated list when provided, else the
    /// single inference URL.
    pub fn endpoints(&self) -> Vec<String> {
        let pool = split_csv(&self.deepseek_endpoints);
        if pool.is_empty() { vec![self.ticket_infer_url.clone()] } else { pool }
    }
}
