pub mod calls;
pub mod codec;
pub mod error;
pub mod publisher;
pub mod reorder;
pub mod rtp;
pub mod segment;
pub mod sip;
pub mod sniffer;

pub use calls::{CaptureState, EmittedSegment};
pub use error::CaptureError;

/// Wall-clock seconds since the Unix epoch, as carried in segment metadata.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
