//! Fast cut: concatenate segment files verbatim, re-encoding only the first
//! and last segments when the request edges fall inside them.

use std::process::Stdio;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use segments::SegmentInfo;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::CutError;
use crate::ffmpeg::{cut_segment_args, spawn_ffmpeg};
use crate::probe::streams_info;

pub(crate) const CHUNK_SIZE: usize = 16 * 1024;
pub(crate) const CHANNEL_DEPTH: usize = 8;

/// A cut's output bytes, produced as they become available. The first `Err`
/// item is also the last item.
pub type ByteStream = ReceiverStream<Result<Bytes, CutError>>;

/// Cut `[start, end)` out of the given segment list by concatenation.
///
/// Only the first and last segments are ever passed through an encoder, and
/// only when the requested edge actually falls inside them; everything else
/// streams from disk byte-for-byte. This requires consistent codec settings
/// across segments, which holds for segments of one stream.
///
/// The list must begin and end with a real segment. Interior `None` holes
/// (from a selector call with `allow_holes`) are skipped; the consumer sees
/// a timeline jump.
pub fn fast_cut_segments(
    segments: Vec<Option<SegmentInfo>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<ByteStream, CutError> {
    let first = segments
        .first()
        .and_then(|s| s.as_ref())
        .ok_or(CutError::UnexpectedHole)?;
    let last = segments
        .last()
        .and_then(|s| s.as_ref())
        .ok_or(CutError::UnexpectedHole)?;

    let first_start = first.start.ok_or(CutError::BadRange("segment has no timestamp"))?;
    let last_start = last.start.ok_or(CutError::BadRange("segment has no timestamp"))?;

    // seconds into the first segment to begin, and into the last to end
    let cut_start = (start - first_start).num_milliseconds() as f64 / 1000.0;
    if cut_start < 0.0 {
        return Err(CutError::BadRange(
            "first segment doesn't begin until after cut start, but no leading hole indicated",
        ));
    }
    let cut_end = (end - last_start).num_milliseconds() as f64 / 1000.0;
    if cut_end < 0.0 {
        return Err(CutError::BadRange(
            "last segment ends before cut end, but no trailing hole indicated",
        ));
    }

    // Trim only when an edge falls strictly inside its segment; an aligned
    // request concatenates untouched bytes.
    let trim_first = cut_start > 0.0;
    let trim_last = cut_end > 0.0 && cut_end < last.duration_secs();

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let result = drive(&segments, cut_start, cut_end, trim_first, trim_last, &tx).await;
        if let Err(e) = result {
            let _ = tx.send(Err(e)).await;
        }
    });
    Ok(ReceiverStream::new(rx))
}

/// Rough cut: concatenation only, for segment-aligned requests and previews.
pub fn rough_cut_segments(segments: Vec<Option<SegmentInfo>>) -> ByteStream {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        for segment in segments.iter().flatten() {
            if let Err(e) = send_file(&segment.path, &tx).await {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    });
    ReceiverStream::new(rx)
}

async fn drive(
    segments: &[Option<SegmentInfo>],
    cut_start: f64,
    cut_end: f64,
    trim_first: bool,
    trim_last: bool,
    tx: &mpsc::Sender<Result<Bytes, CutError>>,
) -> Result<(), CutError> {
    let last_index = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        let Some(segment) = segment else {
            debug!("skipping discontinuity while cutting");
            continue;
        };

        let ss = (index == 0 && trim_first).then_some(cut_start);
        let to = (index == last_index && trim_last).then_some(cut_end);
        if ss.is_some() || to.is_some() {
            send_trimmed(segment, ss, to, tx).await?;
        } else {
            send_file(&segment.path, tx).await?;
        }
    }
    Ok(())
}

/// Stream one segment through ffmpeg with `-ss`/`-to` trims.
async fn send_trimmed(
    segment: &SegmentInfo,
    cut_start: Option<f64>,
    cut_end: Option<f64>,
    tx: &mpsc::Sender<Result<Bytes, CutError>>,
) -> Result<(), CutError> {
    let streams = streams_info(&segment.path).await?;
    let args = cut_segment_args(&streams, &segment.path, cut_start, cut_end);
    let mut child = spawn_ffmpeg(&args, Stdio::null(), Stdio::piped())?;

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            // consumer went away; kill_on_drop reaps the child
            return Ok(());
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(CutError::Subprocess { status });
    }
    Ok(())
}

pub(crate) async fn send_file(
    path: &std::path::Path,
    tx: &mpsc::Sender<Result<Bytes, CutError>>,
) -> Result<(), CutError> {
    let mut file = tokio::fs::File::open(path).await?;
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
