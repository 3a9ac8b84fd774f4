use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
