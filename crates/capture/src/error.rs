use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("capture interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("capture interface does not provide an Ethernet channel")]
    UnsupportedChannel,
}
