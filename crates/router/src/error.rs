use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("queue transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
