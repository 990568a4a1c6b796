//! Live HLS capture into the segment archive.
//!
//! One worker per (channel, quality) pair polls the media playlist on a
//! tight interval, downloads every newly listed segment in parallel under a
//! small concurrency bound, and persists them with the archive's temp-name +
//! rename discipline.

pub mod error;
pub mod fetch;
pub mod manager;
pub mod worker;

pub use error::DownloadError;
pub use fetch::download_segment;
pub use manager::{WorkerSpec, run_workers};
pub use worker::{CaptureWorker, WorkerConfig};

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, DownloadError>;
