pub mod allowlist;
pub mod backend;
pub mod error;
pub mod preprocess;
pub mod remote;
pub mod resample;
pub mod worker;

pub use allowlist::AllowList;
pub use backend::{AsrBackend, Recognition};
pub use error::WorkerError;
pub use worker::Worker;
