//! Streamed download of one media segment into the archive.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use providers::PlaylistEntry;
use reqwest::Client;
use segments::SegmentWriter;
use tracing::{debug, warn};

use crate::error::DownloadError;

/// Timeout covering the whole segment body read. Listings and playlists use
/// a much shorter one; segment bodies can legitimately take a while.
const SEGMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch one segment and persist it.
///
/// The body streams into a temp-named file in the segment's hour directory.
/// A clean EOF finalizes it as `full`; an error after at least one byte
/// keeps the prefix as `partial` (the selector can still serve it until a
/// full copy arrives via backfill); an error before any byte leaves nothing
/// behind.
pub async fn download_segment(
    client: &Client,
    base_dir: &Path,
    channel: &str,
    quality: &str,
    entry: &PlaylistEntry,
) -> Result<(), DownloadError> {
    let date = entry.date.expect("undated entries are filtered before download");

    let response = client
        .get(entry.uri.clone())
        .timeout(SEGMENT_TIMEOUT)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status,
            url: entry.uri.to_string(),
        });
    }

    let mut writer =
        SegmentWriter::create(base_dir, channel, quality, date, entry.duration).await?;
    let mut body = response.bytes_stream();

    let result: Result<(), DownloadError> = loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                if let Err(e) = writer.write(&chunk).await {
                    break Err(e.into());
                }
            }
            Some(Err(e)) => break Err(e.into()),
            None => break Ok(()),
        }
    };

    match result {
        Ok(()) => {
            let path = writer.finalize_full().await?;
            debug!(path = %path.display(), "wrote segment");
            Ok(())
        }
        Err(e) => {
            if writer.bytes_written() > 0 {
                let path = writer.finalize_partial().await?;
                warn!(
                    path = %path.display(),
                    error = %e,
                    "segment download interrupted, kept partial",
                );
            } else if let Err(discard_err) = writer.discard().await {
                warn!(error = %discard_err, "failed to remove empty temp segment");
            }
            Err(e)
        }
    }
}
