//! Segment archive primitives shared across streamvault services.
//!
//! This crate defines the on-disk archive contract: the segment filename
//! codec, the hour-directory layout, the atomic temp-write/rename
//! discipline, and the best-available segment selector that turns a
//! requested time range into a gap-aware segment list.

pub mod archive;
pub mod error;
pub mod segment;
pub mod selector;

pub use archive::{SegmentWriter, atomic_write, ensure_directory, listdir, rename};
pub use error::SegmentError;
pub use segment::{HOUR_FMT, SegmentInfo, SegmentKind, hour_str, parse_segment_path};
pub use selector::{best_segments, hour_paths_for_range};

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Apply a random +/- 10% change to an interval, to smooth out patterns and
/// prevent every node from polling or retrying at the same instant.
pub fn jitter(interval: std::time::Duration) -> std::time::Duration {
    use rand::RngExt;
    let factor = 0.9 + 0.2 * rand::rng().random::<f64>();
    interval.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jitter(base);
            assert!(j >= Duration::from_secs_f64(9.0));
            assert!(j <= Duration::from_secs_f64(11.0));
        }
    }
}
