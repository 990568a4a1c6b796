//! Cut assembly: turning a selected segment list into one contiguous byte
//! stream.
//!
//! The fast cut concatenates archived files and re-encodes at most the two
//! edge segments; the full cut feeds everything through a single encoder
//! subprocess for precise trims or container conversion. The encoder is an
//! opaque CLI tool (ffmpeg-compatible: input on stdin, output on stdout,
//! args supplied by the caller).

pub mod error;
pub mod fast;
pub mod ffmpeg;
pub mod full;
pub mod probe;

pub use error::CutError;
pub use fast::{ByteStream, fast_cut_segments, rough_cut_segments};
pub use full::full_cut_segments;
pub use probe::{StreamInfo, streams_info};

use chrono::{DateTime, Utc};

/// Result type for cut operations
pub type Result<T> = std::result::Result<T, CutError>;

/// The fixed record external event sources project into: everything the
/// core needs to know to cut one event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CutRequest {
    pub channel: String,
    pub quality: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Encoder CLI arguments for a full cut; empty means fast cut.
    #[serde(default)]
    pub encoder_args: Vec<String>,
}
