//! PUSH-side of the capture → ASR hop.

use bytes::Bytes;
use zeromq::{Socket, SocketSend, ZmqMessage};

use crate::calls::EmittedSegment;
use crate::error::CaptureError;

pub struct SegmentPublisher {
    socket: zeromq::PushSocket,
}

impl SegmentPublisher {
    /// Connects to the worker's PULL bind. The worker may come up after us,
    /// so connection refusal is retried for a while before giving up.
    pub async fn connect(endpoint: &str) -> Result<Self, CaptureError> {
        let mut attempts = 0u32;
        loop {
            let mut socket = zeromq::PushSocket::new();
            match socket.connect(endpoint).await {
                Ok(_) => return Ok(Self { socket }),
                Err(e) if attempts < 30 => {
                    attempts += 1;
                    tracing::warn!(%endpoint, error = %e, "push connect failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sends one segment as a multipart message:
    /// `[meta_json, pcm_bytes [, far_end_pcm]]`.
    pub async fn send(&mut self, segment: EmittedSegment) -> Result<(), CaptureError> {
        let meta = serde_json::to_vec(&segment.meta)?;
        let mut message = ZmqMessage::from(Bytes::from(meta));
        message.push_back(Bytes::from(segment.pcm));
        if let Some(far_end) = segment.far_end {
            message.push_back(Bytes::from(far_end));
        }
        self.socket.send(message).await?;
        Ok(())
    }
}
