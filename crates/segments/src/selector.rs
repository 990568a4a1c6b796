//! Best-available segment selection for a requested time range.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::warn;

use crate::archive::listdir;
use crate::error::SegmentError;
use crate::segment::{SegmentInfo, SegmentKind, hour_str, parse_segment_path};

/// Hour directories to check when looking for segments between `start` and
/// `end`. Begins one hour before `start`, as a segment starting in the prior
/// hour may still cover the requested start time.
pub fn hour_paths_for_range(
    hours_path: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<PathBuf> {
    let truncate =
        |dt: DateTime<Utc>| dt.duration_trunc(Duration::hours(1)).expect("in-range timestamp");
    let mut current = truncate(start) - Duration::hours(1);
    let end = truncate(end);
    let mut paths = Vec::new();
    while current <= end {
        paths.push(hours_path.join(hour_str(current)));
        current += Duration::hours(1);
    }
    paths
}

/// Within one hour directory, the best segment per unique start time.
///
/// Best is a full segment (longest duration, ties broken by highest hash so
/// every node picks the same one), or failing that the largest partial on
/// disk. Temp segments are skipped, as are names that do not parse.
fn best_segments_by_start(hour_path: &Path) -> Vec<SegmentInfo> {
    let names = match listdir(hour_path) {
        Ok(names) => names,
        Err(e) => {
            warn!(path = %hour_path.display(), error = %e, "failed to list hour directory");
            return Vec::new();
        }
    };

    let mut parsed: Vec<SegmentInfo> = Vec::new();
    for name in names {
        let path = hour_path.join(&name);
        let Some(path_str) = path.to_str() else {
            continue;
        };
        match parse_segment_path(path_str) {
            Ok(segment) if segment.kind == SegmentKind::Temp => {
                // might go away by the time we want to use it
            }
            Ok(segment) if segment.start.is_some() => parsed.push(segment),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to parse segment"),
        }
    }
    parsed.sort_by_key(|segment| segment.start);

    let mut best = Vec::new();
    let mut group: Vec<SegmentInfo> = Vec::new();
    for segment in parsed {
        if let Some(first) = group.first()
            && first.start != segment.start
        {
            if let Some(winner) = resolve_group(std::mem::take(&mut group)) {
                best.push(winner);
            }
        }
        group.push(segment);
    }
    if let Some(winner) = resolve_group(group) {
        best.push(winner);
    }
    best
}

fn resolve_group(group: Vec<SegmentInfo>) -> Option<SegmentInfo> {
    let full_count = group.iter().filter(|s| !s.is_partial()).count();
    if full_count > 1 {
        // The same segment is sometimes reported with different durations,
        // generally at stream end. Prefer the longest so we get the most
        // data; break hash ties consistently across nodes.
        warn!(
            start = ?group[0].start,
            count = full_count,
            "multiple versions of full segment",
        );
    }
    if full_count > 0 {
        return group
            .into_iter()
            .filter(|s| !s.is_partial())
            .max_by_key(|s| (s.duration, s.hash));
    }
    group.into_iter().max_by_key(|s| {
        std::fs::metadata(&s.path).map(|m| m.len()).unwrap_or(0)
    })
}

/// Return the best sequence of non-overlapping segments covering
/// `[start, end)` under `hours_path` (the directory containing hour
/// directories).
///
/// The returned list holds `Some(segment)` entries in strictly increasing
/// start order, with `None` marking a known discontinuity between its
/// neighbours (or before the first / after the last segment when the range
/// edges are not covered). Two adjacent segments are guaranteed to join
/// exactly. A partial segment is always followed by `None`, since its tail
/// cannot be guaranteed intact.
///
/// With `allow_holes = false`, the first discontinuity fails the call with
/// [`SegmentError::ContainsHoles`] instead.
pub fn best_segments(
    hours_path: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    allow_holes: bool,
) -> Result<Vec<Option<SegmentInfo>>, SegmentError> {
    // The exact equality checks below are not vulnerable to float error:
    // all inputs are millisecond-precise and represented as integers.
    let mut result: Vec<Option<SegmentInfo>> = Vec::new();
    let mut last: Option<SegmentInfo> = None;

    'hours: for hour_path in hour_paths_for_range(hours_path, start, end) {
        for segment in best_segments_by_start(&hour_path) {
            let (Some(seg_start), Some(seg_end)) = (segment.start, segment.end()) else {
                continue;
            };

            match &last {
                None => {
                    if seg_start <= start && start < seg_end {
                        // covers the requested start
                    } else if start < seg_start && seg_start < end {
                        // nothing covers the start; the range begins with a hole
                        if !allow_holes {
                            return Err(SegmentError::ContainsHoles);
                        }
                        result.push(None);
                    } else {
                        // before the range without covering it, or past the end
                        continue;
                    }
                }
                Some(prev) => {
                    let prev_end = prev.end().expect("emitted segments have timestamps");
                    if seg_start < prev_end {
                        // Overlap. This shouldn't happen, but may if the stream
                        // drops then restarts quickly. Ignore the overlapping
                        // segment and continue.
                        warn!(segment = %segment.path.display(), "overlapping segment");
                        continue;
                    }
                    if prev.is_partial() || prev_end < seg_start {
                        if !allow_holes {
                            return Err(SegmentError::ContainsHoles);
                        }
                        result.push(None);
                    }
                }
            }

            let done = end <= seg_end;
            result.push(Some(segment.clone()));
            last = Some(segment);
            if done {
                break 'hours;
            }
        }
    }

    // trailing hole: nothing found, last is partial, or the end isn't reached
    let needs_tail = match &last {
        None => true,
        Some(seg) => seg.is_partial() || seg.end().expect("has timestamp") < end,
    };
    if needs_tail {
        if !allow_holes {
            return Err(SegmentError::ContainsHoles);
        }
        result.push(None);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::TimeZone;
    use std::path::Path;

    fn ts(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap() + Duration::milliseconds(ms as i64)
    }

    fn write_segment(
        root: &Path,
        start: DateTime<Utc>,
        duration_ms: i64,
        kind: SegmentKind,
        hash_fill: u8,
        content: &[u8],
    ) -> PathBuf {
        let hour_dir = root.join(hour_str(start));
        std::fs::create_dir_all(&hour_dir).unwrap();
        let token = match kind {
            SegmentKind::Temp => uuid::Uuid::new_v4().to_string(),
            _ => URL_SAFE_NO_PAD.encode([hash_fill; 32]),
        };
        let name = format!(
            "{}-{:.3}-{}-{}.ts",
            start.format("%H:%M:%S%.3f"),
            duration_ms as f64 / 1000.0,
            kind,
            token,
        );
        let path = hour_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn hour_paths_include_previous_hour() {
        let paths = hour_paths_for_range(Path::new("/a"), ts(1, 30, 0, 0), ts(2, 10, 0, 0));
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            vec!["2024-01-01T00", "2024-01-01T01", "2024-01-01T02"]
        );
    }

    #[test]
    fn contiguous_segments_cover_range() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Full, 1, b"a");
        write_segment(dir.path(), ts(0, 0, 2, 0), 2000, SegmentKind::Full, 2, b"b");

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 4, 0), false).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|s| s.is_some()));

        // monotonicity and exact coverage
        let starts: Vec<_> = result.iter().map(|s| s.as_ref().unwrap().start).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(result[0].as_ref().unwrap().start, Some(ts(0, 0, 0, 0)));
        assert_eq!(result[1].as_ref().unwrap().end(), Some(ts(0, 0, 4, 0)));
    }

    #[test]
    fn hole_between_segments_yields_none_marker() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Full, 1, b"a");
        write_segment(dir.path(), ts(0, 0, 5, 0), 2000, SegmentKind::Full, 2, b"b");

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 7, 0), true).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result[0].is_some());
        assert!(result[1].is_none());
        assert!(result[2].is_some());

        assert!(matches!(
            best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 7, 0), false),
            Err(SegmentError::ContainsHoles)
        ));
    }

    #[test]
    fn duplicate_fulls_resolved_by_duration_then_hash() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Full, 0xAA, b"a");
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Full, 0xBB, b"b");

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), false).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_ref().unwrap().hash, Some([0xBB; 32]));

        // a longer duplicate wins regardless of hash
        write_segment(dir.path(), ts(0, 0, 0, 0), 2500, SegmentKind::Full, 0x01, b"c");
        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), false).unwrap();
        assert_eq!(result[0].as_ref().unwrap().hash, Some([0x01; 32]));
    }

    #[test]
    fn largest_partial_wins_when_no_full_exists() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            ts(0, 0, 0, 0),
            2000,
            SegmentKind::Partial,
            1,
            &vec![0u8; 100 * 1024],
        );
        let big = write_segment(
            dir.path(),
            ts(0, 0, 0, 0),
            2000,
            SegmentKind::Partial,
            2,
            &vec![0u8; 250 * 1024],
        );

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), true).unwrap();
        // partial is followed by a trailing hole marker
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].as_ref().unwrap().path, big);
        assert!(result[1].is_none());
    }

    #[test]
    fn temp_segments_are_never_selected() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Temp, 0, b"t");

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), true).unwrap();
        assert_eq!(result, vec![None]);
    }

    #[test]
    fn first_segment_may_start_in_previous_hour() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 59, 59, 0), 3000, SegmentKind::Full, 1, b"a");

        let result = best_segments(dir.path(), ts(1, 0, 0, 0), ts(1, 0, 1, 0), true).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_ref().unwrap().start, Some(ts(0, 59, 59, 0)));
    }

    #[test]
    fn overlapping_segment_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), ts(0, 0, 0, 0), 2000, SegmentKind::Full, 1, b"a");
        write_segment(dir.path(), ts(0, 0, 1, 0), 2000, SegmentKind::Full, 2, b"b");
        write_segment(dir.path(), ts(0, 0, 2, 0), 2000, SegmentKind::Full, 3, b"c");

        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 4, 0), false).unwrap();
        let starts: Vec<_> = result
            .iter()
            .map(|s| s.as_ref().unwrap().start.unwrap())
            .collect();
        assert_eq!(starts, vec![ts(0, 0, 0, 0), ts(0, 0, 2, 0)]);
    }

    #[test]
    fn empty_archive_yields_single_hole() {
        let dir = tempfile::tempdir().unwrap();
        let result = best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), true).unwrap();
        assert_eq!(result, vec![None]);
        assert!(matches!(
            best_segments(dir.path(), ts(0, 0, 0, 0), ts(0, 0, 2, 0), false),
            Err(SegmentError::ContainsHoles)
        ));
    }
}
