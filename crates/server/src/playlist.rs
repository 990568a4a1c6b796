//! HLS playlist text generation over the archive.

use segments::SegmentInfo;

/// Master playlist over `(name, url)` media playlist pairs. Each variant is
/// named with a VIDEO rendition carrying no URL of its own, mirroring the
/// upstream convention.
pub fn generate_master<'a>(playlists: impl Iterator<Item = (&'a str, String)>) -> String {
    let mut lines = vec!["#EXTM3U".to_string()];
    for (name, url) in playlists {
        lines.push(format!(
            "#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"{name}\",NAME=\"{name}\",AUTOSELECT=YES,DEFAULT=YES"
        ));
        lines.push(format!("#EXT-X-STREAM-INF:VIDEO=\"{name}\""));
        lines.push(url);
    }
    lines.join("\n") + "\n"
}

/// Media playlist from a selector result. Segment URIs are
/// `<base_url>/<hour>/<filename>`; a `None` hole becomes an explicit
/// discontinuity.
pub fn generate_media(segments: &[Option<SegmentInfo>], base_url: &str) -> String {
    let mut lines = vec![
        "#EXTM3U".to_string(),
        "#EXT-X-TARGETDURATION:6".to_string(),
    ];
    for segment in segments {
        match segment {
            Some(segment) => {
                // hour/filename is the tail of the archive path
                let mut parts = segment.path.components().rev();
                let filename = parts.next();
                let hour = parts.next();
                if let (Some(hour), Some(filename)) = (hour, filename) {
                    lines.push(format!("#EXTINF:{:.3},live", segment.duration_secs()));
                    lines.push(format!(
                        "{base_url}/{}/{}",
                        hour.as_os_str().to_string_lossy(),
                        filename.as_os_str().to_string_lossy(),
                    ));
                }
            }
            None => lines.push("#EXT-X-DISCONTINUITY".to_string()),
        }
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    #[test]
    fn master_lists_each_quality_as_video_rendition() {
        let out = generate_master(
            [
                ("source", "/playlist/chan/source.m3u8".to_string()),
                ("720p60", "/playlist/chan/720p60.m3u8".to_string()),
            ]
            .into_iter(),
        );
        assert!(out.starts_with("#EXTM3U\n"));
        assert!(out.contains("GROUP-ID=\"source\""));
        assert!(out.contains("#EXT-X-STREAM-INF:VIDEO=\"720p60\""));
        assert!(out.ends_with("/playlist/chan/720p60.m3u8\n"));
    }

    #[test]
    fn media_playlist_marks_holes_as_discontinuities() {
        let segment = SegmentInfo {
            path: PathBuf::from(
                "/archive/chan/source/2024-01-01T00/00:00:00.000-2.000-full-AAAA.ts",
            ),
            channel: Some("chan".into()),
            quality: Some("source".into()),
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            duration: Duration::milliseconds(2000),
            kind: segments::SegmentKind::Full,
            hash: Some([0; 32]),
            temp_id: None,
        };
        let out = generate_media(&[Some(segment), None], "/segments/chan/source");
        assert!(out.contains("#EXTINF:2.000,live"));
        assert!(out.contains(
            "/segments/chan/source/2024-01-01T00/00:00:00.000-2.000-full-AAAA.ts"
        ));
        assert!(out.contains("#EXT-X-DISCONTINUITY"));
    }
}
