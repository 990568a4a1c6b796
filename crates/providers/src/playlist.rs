//! Media playlist parsing into dated segment entries.

use chrono::{DateTime, Duration, Utc};
use m3u8_rs::Playlist;
use tracing::warn;
use url::Url;

use crate::error::ProviderError;

/// One media playlist entry, in flight between a poll and its download.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    /// Absolute segment URI.
    pub uri: Url,
    /// Wall-clock start, from `EXT-X-PROGRAM-DATE-TIME` or inferred by
    /// accumulating durations from the last dated entry. `None` when the
    /// playlist carries no dates at all.
    pub date: Option<DateTime<Utc>>,
    /// Advertised duration, millisecond precision.
    pub duration: Duration,
}

/// A fetched media playlist reduced to what the downloader needs.
#[derive(Debug, Clone)]
pub struct MediaPlaylistFetch {
    pub entries: Vec<PlaylistEntry>,
    /// `EXT-X-ENDLIST` was present; the stream is over.
    pub ended: bool,
}

/// Parse a media playlist, resolving segment URIs against `base` and dating
/// entries from program-date-time tags.
pub fn parse_media_playlist(content: &[u8], base: &Url) -> Result<MediaPlaylistFetch, ProviderError> {
    let playlist = match m3u8_rs::parse_playlist_res(content) {
        Ok(Playlist::MediaPlaylist(playlist)) => playlist,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(ProviderError::playlist("expected media playlist, got master"));
        }
        Err(e) => {
            return Err(ProviderError::playlist(format!("failed to parse media playlist: {e}")));
        }
    };

    let mut entries = Vec::with_capacity(playlist.segments.len());
    let mut next_date: Option<DateTime<Utc>> = None;
    for segment in &playlist.segments {
        let uri = match base.join(&segment.uri) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(uri = %segment.uri, error = %e, "skipping segment with unresolvable URI");
                continue;
            }
        };
        let duration = Duration::milliseconds((f64::from(segment.duration) * 1000.0).round() as i64);
        let date = segment
            .program_date_time
            .map(|pdt| pdt.with_timezone(&Utc))
            .or(next_date);
        next_date = date.map(|d| d + duration);
        entries.push(PlaylistEntry {
            uri,
            date,
            duration,
        });
    }

    Ok(MediaPlaylistFetch {
        entries,
        ended: playlist.end_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> Url {
        Url::parse("https://video.example.com/hls/").unwrap()
    }

    #[test]
    fn dates_are_inferred_after_a_program_date_time() {
        let playlist = b"#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:2\n\
#EXT-X-MEDIA-SEQUENCE:100\n\
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z\n\
#EXTINF:2.000,live\n\
seg100.ts\n\
#EXTINF:2.002,live\n\
seg101.ts\n";

        let fetched = parse_media_playlist(playlist, &base()).unwrap();
        assert!(!fetched.ended);
        assert_eq!(fetched.entries.len(), 2);

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(fetched.entries[0].date, Some(t0));
        assert_eq!(fetched.entries[0].duration, Duration::milliseconds(2000));
        assert_eq!(
            fetched.entries[0].uri.as_str(),
            "https://video.example.com/hls/seg100.ts"
        );
        assert_eq!(
            fetched.entries[1].date,
            Some(t0 + Duration::milliseconds(2000))
        );
        assert_eq!(fetched.entries[1].duration, Duration::milliseconds(2002));
    }

    #[test]
    fn entries_without_any_date_stay_undated() {
        let playlist = b"#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:2\n\
#EXTINF:2.000,\n\
seg0.ts\n";
        let fetched = parse_media_playlist(playlist, &base()).unwrap();
        assert_eq!(fetched.entries[0].date, None);
    }

    #[test]
    fn endlist_is_reported() {
        let playlist = b"#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:2\n\
#EXTINF:2.000,\n\
seg0.ts\n\
#EXT-X-ENDLIST\n";
        let fetched = parse_media_playlist(playlist, &base()).unwrap();
        assert!(fetched.ended);
    }

    #[test]
    fn master_playlist_is_rejected() {
        let playlist = b"#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1000000\n\
variant.m3u8\n";
        assert!(matches!(
            parse_media_playlist(playlist, &base()),
            Err(ProviderError::Playlist { .. })
        ));
    }

    #[test]
    fn absolute_segment_uris_are_kept() {
        let playlist = b"#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:2\n\
#EXTINF:2.000,\n\
https://cdn.example.net/abs/seg0.ts\n";
        let fetched = parse_media_playlist(playlist, &base()).unwrap();
        assert_eq!(
            fetched.entries[0].uri.as_str(),
            "https://cdn.example.net/abs/seg0.ts"
        );
    }
}
