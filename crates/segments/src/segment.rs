use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::error::SegmentError;

/// Hour directory name format (UTC).
pub const HOUR_FMT: &str = "%Y-%m-%dT%H";

/// Time-of-day part of a segment filename, millisecond precision.
const TIME_FMT: &str = "%H:%M:%S%.3f";

/// Format the hour directory name for a timestamp.
pub fn hour_str(dt: DateTime<Utc>) -> String {
    dt.format(HOUR_FMT).to_string()
}

/// Finalization state of a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Bytes are exactly the bytes served for the playlist entry.
    Full,
    /// Bytes are a prefix of the served bytes (download was truncated).
    Partial,
    /// In-progress write. Never served, selected or referenced by hash.
    Temp,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Full => "full",
            SegmentKind::Partial => "partial",
            SegmentKind::Temp => "temp",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "full" => Ok(SegmentKind::Full),
            "partial" => Ok(SegmentKind::Partial),
            "temp" => Ok(SegmentKind::Temp),
            _ => Err(()),
        }
    }
}

/// Info parsed from a segment path, including the original path.
///
/// `channel`, `quality` and `start` are `None` when the parsed path was only
/// a trailing slice that did not include the corresponding directories (the
/// filename alone carries the time of day but not the date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub channel: Option<String>,
    pub quality: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub kind: SegmentKind,
    /// SHA-256 of the file bytes. `None` for temp segments.
    pub hash: Option<[u8; 32]>,
    /// The temp file's unique token. `None` for full/partial segments.
    pub temp_id: Option<Uuid>,
}

impl SegmentInfo {
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.start.map(|s| s + self.duration)
    }

    pub fn is_partial(&self) -> bool {
        self.kind != SegmentKind::Full
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.num_milliseconds() as f64 / 1000.0
    }

    /// The segment's filename, `<HH:MM:SS.fff>-<duration>-<kind>-<token>.ts`.
    pub fn file_name(&self) -> Result<String, SegmentError> {
        let start = self.start.ok_or(SegmentError::MissingField("start"))?;
        let token = match self.kind {
            SegmentKind::Temp => self
                .temp_id
                .ok_or(SegmentError::MissingField("temp id"))?
                .to_string(),
            _ => URL_SAFE_NO_PAD.encode(self.hash.ok_or(SegmentError::MissingField("hash"))?),
        };
        Ok(format!(
            "{}-{:.3}-{}-{}.ts",
            start.format(TIME_FMT),
            self.duration_secs(),
            self.kind,
            token,
        ))
    }

    /// The archive-relative path `<channel>/<quality>/<hour>/<filename>`.
    pub fn relative_path(&self) -> Result<PathBuf, SegmentError> {
        let channel = self
            .channel
            .as_deref()
            .ok_or(SegmentError::MissingField("channel"))?;
        let quality = self
            .quality
            .as_deref()
            .ok_or(SegmentError::MissingField("quality"))?;
        let start = self.start.ok_or(SegmentError::MissingField("start"))?;
        let mut path = PathBuf::from(channel);
        path.push(quality);
        path.push(hour_str(start));
        path.push(self.file_name()?);
        Ok(path)
    }
}

/// Parse an hour directory name, returning the date and hour-of-day.
fn parse_hour(hour: &str) -> Option<(NaiveDate, u32)> {
    let (date, rest) = hour.split_at_checked(10)?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hour = rest.strip_prefix('T')?;
    if hour.len() != 2 {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    (hour < 24).then_some((date, hour))
}

/// Parse a segment path, returning a [`SegmentInfo`].
///
/// The path may be a full archive path or any trailing slice of one; fields
/// whose directories are absent come back as `None`. Fails with
/// [`SegmentError::BadFormat`] on any deviation from the naming scheme.
pub fn parse_segment_path(path: &str) -> Result<SegmentInfo, SegmentError> {
    let bad = |reason: &str| SegmentError::bad_format(path, reason);

    let mut parts: Vec<Option<&str>> = path.split('/').map(Some).collect();
    // left-pad to channel/quality/hour/filename
    while parts.len() < 4 {
        parts.insert(0, None);
    }
    let &[channel, quality, hour, filename] = &parts[parts.len() - 4..] else {
        unreachable!()
    };
    let filename = filename.ok_or_else(|| bad("empty path"))?;

    let stem = filename
        .strip_suffix(".ts")
        .ok_or_else(|| bad("does not end in .ts"))?;
    let mut fields = stem.splitn(4, '-');
    let (Some(time), Some(duration), Some(kind), Some(token)) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(bad("not enough dashes in filename"));
    };

    let time = chrono::NaiveTime::parse_from_str(time, TIME_FMT)
        .map_err(|e| bad(&format!("bad time: {e}")))?;

    let duration: f64 = duration
        .parse()
        .map_err(|e| bad(&format!("bad duration: {e}")))?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(bad("bad duration: out of range"));
    }
    let duration = Duration::milliseconds((duration * 1000.0).round() as i64);

    let kind: SegmentKind = kind
        .parse()
        .map_err(|()| bad(&format!("unknown type {kind:?}")))?;

    let (hash, temp_id) = match kind {
        SegmentKind::Temp => {
            let id = Uuid::parse_str(token).map_err(|e| bad(&format!("bad temp token: {e}")))?;
            (None, Some(id))
        }
        _ => {
            let decoded = URL_SAFE_NO_PAD
                .decode(token)
                .map_err(|e| bad(&format!("bad hash: {e}")))?;
            let hash: [u8; 32] = decoded
                .try_into()
                .map_err(|_| bad("bad hash: not 32 bytes"))?;
            (Some(hash), None)
        }
    };

    let start = match hour {
        Some(hour) => {
            let (date, hour_of_day) =
                parse_hour(hour).ok_or_else(|| bad(&format!("bad hour directory {hour:?}")))?;
            if time.hour() != hour_of_day {
                return Err(bad("filename hour does not match hour directory"));
            }
            Some(Utc.from_utc_datetime(&date.and_time(time)))
        }
        None => None,
    };

    Ok(SegmentInfo {
        path: PathBuf::from(path),
        channel: channel.map(str::to_owned),
        quality: quality.map(str::to_owned),
        start,
        duration,
        kind,
        hash,
        temp_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash(fill: u8) -> [u8; 32] {
        [fill; 32]
    }

    fn sample(kind: SegmentKind) -> SegmentInfo {
        SegmentInfo {
            path: PathBuf::new(),
            channel: Some("loadingreadyrun".into()),
            quality: Some("source".into()),
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 23, 45).unwrap()
                + Duration::milliseconds(123)),
            duration: Duration::milliseconds(2002),
            kind,
            hash: match kind {
                SegmentKind::Temp => None,
                _ => Some(sample_hash(0xab)),
            },
            temp_id: match kind {
                SegmentKind::Temp => Some(Uuid::nil()),
                _ => None,
            },
        }
    }

    #[test]
    fn round_trips_full_segment() {
        let segment = sample(SegmentKind::Full);
        let path = segment.relative_path().unwrap();
        let path_str = path.to_str().unwrap();
        assert!(path_str.starts_with("loadingreadyrun/source/2024-01-01T10/10:23:45.123-2.002-full-"));

        let parsed = parse_segment_path(path_str).unwrap();
        let expected = SegmentInfo {
            path: path.clone(),
            ..segment
        };
        assert_eq!(parsed, expected);
    }

    #[test]
    fn round_trips_partial_and_temp() {
        for kind in [SegmentKind::Partial, SegmentKind::Temp] {
            let segment = sample(kind);
            let path = segment.relative_path().unwrap();
            let parsed = parse_segment_path(path.to_str().unwrap()).unwrap();
            assert_eq!(parsed.kind, kind);
            assert_eq!(parsed.hash, segment.hash);
            assert_eq!(parsed.temp_id, segment.temp_id);
            assert_eq!(parsed.start, segment.start);
        }
    }

    #[test]
    fn accepts_absolute_paths_and_bare_filenames() {
        let segment = sample(SegmentKind::Full);
        let rel = segment.relative_path().unwrap();
        let abs = format!("/srv/archive/{}", rel.to_str().unwrap());

        let parsed = parse_segment_path(&abs).unwrap();
        assert_eq!(parsed.channel.as_deref(), Some("loadingreadyrun"));
        assert_eq!(parsed.start, segment.start);

        let filename = segment.file_name().unwrap();
        let parsed = parse_segment_path(&filename).unwrap();
        assert_eq!(parsed.channel, None);
        assert_eq!(parsed.quality, None);
        assert_eq!(parsed.start, None);
        assert_eq!(parsed.duration, segment.duration);
        assert_eq!(parsed.hash, segment.hash);
    }

    #[test]
    fn rejects_malformed_names() {
        let cases = [
            "notasegment",
            "10:23:45.123-2.002-full-AAAA",                     // no .ts
            "10:23:45.123-2.002-full.ts",                       // missing hash
            "10:23:45.123-2.002-bogus-AAAA.ts",                 // unknown type
            "10:23:45.123-abc-full-AAAA.ts",                    // bad duration
            "banana-2.002-full-AAAA.ts",                        // bad time
            "10:23:45.123-2.002-temp-nonuuid.ts",               // bad temp token
            "10:23:45.123-2.002-full-AAAA.ts",                  // hash too short
            "chan/source/2024-99-01T10/10:23:45.123-2.002-full-AAAA.ts", // bad hour dir
        ];
        for case in cases {
            assert!(
                matches!(parse_segment_path(case), Err(SegmentError::BadFormat { .. })),
                "expected BadFormat for {case:?}",
            );
        }
    }

    #[test]
    fn rejects_hour_mismatch() {
        let segment = sample(SegmentKind::Full);
        let name = segment.file_name().unwrap();
        let path = format!("chan/source/2024-01-01T11/{name}");
        assert!(matches!(
            parse_segment_path(&path),
            Err(SegmentError::BadFormat { .. })
        ));
    }

    #[test]
    fn duration_keeps_millisecond_precision() {
        let parsed = parse_segment_path(&format!(
            "00:00:00.000-1.001-full-{}.ts",
            URL_SAFE_NO_PAD.encode(sample_hash(1)),
        ))
        .unwrap();
        assert_eq!(parsed.duration, Duration::milliseconds(1001));
    }
}
