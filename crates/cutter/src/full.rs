//! Full cut: pipe every segment through a single encoder process.

use std::process::Stdio;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use segments::SegmentInfo;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::CutError;
use crate::fast::{ByteStream, CHANNEL_DEPTH, CHUNK_SIZE};
use crate::ffmpeg::{cut_stdin_args, spawn_ffmpeg};

/// Cut `[start, end)` by re-encoding through one subprocess.
///
/// Segment bytes are fed to the encoder's stdin in order; holes are not
/// permitted, callers must pre-reject them. With `stream = true` the
/// encoder's stdout is streamed out as it is produced; otherwise the
/// encoder writes a seekable temp file which is streamed only after a clean
/// exit (some output containers cannot be written to a pipe, and an upload
/// must not begin until the encode is known good).
pub fn full_cut_segments(
    segments: Vec<SegmentInfo>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    encode_args: Vec<String>,
    stream: bool,
) -> Result<ByteStream, CutError> {
    let first_start = segments
        .first()
        .ok_or(CutError::BadRange("no segments to cut"))?
        .start
        .ok_or(CutError::BadRange("segment has no timestamp"))?;

    let cut_start = ((start - first_start).num_milliseconds() as f64 / 1000.0).max(0.0);
    let duration = (end - start).num_milliseconds() as f64 / 1000.0;

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let result = if stream {
            run_streamed(segments, cut_start, duration, encode_args, &tx).await
        } else {
            run_buffered(segments, cut_start, duration, encode_args, &tx).await
        };
        if let Err(e) = result {
            let _ = tx.send(Err(e)).await;
        }
    });
    Ok(ReceiverStream::new(rx))
}

/// Write each segment's bytes into the encoder's stdin, in order.
///
/// A broken pipe is not an error: it means the trim window is done and the
/// encoder didn't need the rest of the input.
async fn feed_input(
    segments: Vec<SegmentInfo>,
    mut stdin: tokio::process::ChildStdin,
) -> Result<(), CutError> {
    for segment in &segments {
        let mut file = tokio::fs::File::open(&segment.path).await?;
        match tokio::io::copy(&mut file, &mut stdin).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("encoder closed stdin early");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
    stdin.shutdown().await.ok();
    Ok(())
}

async fn run_streamed(
    segments: Vec<SegmentInfo>,
    cut_start: f64,
    duration: f64,
    encode_args: Vec<String>,
    tx: &mpsc::Sender<Result<Bytes, CutError>>,
) -> Result<(), CutError> {
    let args = cut_stdin_args(cut_start, duration, &encode_args, false);
    let mut child = spawn_ffmpeg(&args, Stdio::piped(), Stdio::piped())?;
    let stdin = child.stdin.take().expect("stdin piped");
    let mut stdout = child.stdout.take().expect("stdout piped");

    let feeder = tokio::spawn(feed_input(segments, stdin));

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            feeder.abort();
            return Ok(());
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        feeder.abort();
        return Err(CutError::Subprocess { status });
    }
    feeder.await.map_err(std::io::Error::other)??;
    Ok(())
}

async fn run_buffered(
    segments: Vec<SegmentInfo>,
    cut_start: f64,
    duration: f64,
    encode_args: Vec<String>,
    tx: &mpsc::Sender<Result<Bytes, CutError>>,
) -> Result<(), CutError> {
    let output_file = tempfile::tempfile()?;
    let stdout = output_file.try_clone()?;

    let args = cut_stdin_args(cut_start, duration, &encode_args, true);
    let mut child = spawn_ffmpeg(&args, Stdio::piped(), Stdio::from(stdout))?;
    let stdin = child.stdin.take().expect("stdin piped");

    let feeder = tokio::spawn(feed_input(segments, stdin));

    let status = child.wait().await?;
    if !status.success() {
        feeder.abort();
        return Err(CutError::Subprocess { status });
    }
    feeder.await.map_err(std::io::Error::other)??;

    // encode is known good; stream the buffered output
    let mut file = tokio::fs::File::from_std(output_file);
    file.seek(std::io::SeekFrom::Start(0)).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_segment_list_is_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            full_cut_segments(Vec::new(), start, start, Vec::new(), true),
            Err(CutError::BadRange(_))
        ));
    }
}
