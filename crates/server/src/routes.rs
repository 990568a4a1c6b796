//! The node's HTTP surface: archive listings, raw segments, generated
//! playlists, and the cut endpoint.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use chrono::{DateTime, NaiveDateTime, Utc};
use segments::SegmentInfo;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::playlist::{generate_master, generate_media};

#[derive(Clone)]
pub struct AppState {
    /// Archive root.
    pub base_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/files/{channel}/{quality}", get(list_hours))
        .route("/files/{channel}/{quality}/{hour}", get(list_segments))
        .route(
            "/segments/{channel}/{quality}/{hour}/{filename}",
            get(get_segment),
        )
        .route("/playlist/{target}", get(master_playlist))
        .route("/playlist/{channel}/{target}", get(media_playlist))
        .route("/cut/{channel}/{target}", get(cut))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// No path component may begin with a period: no hidden files, no traversal.
fn check_part(part: &str) -> ApiResult<()> {
    if part.starts_with('.') {
        return Err(ApiError::HiddenPath);
    }
    if part.is_empty() || part.contains('/') || part.contains('\\') {
        return Err(ApiError::BadRequest("invalid path component".to_string()));
    }
    Ok(())
}

fn visible(mut names: Vec<String>) -> Vec<String> {
    names.retain(|name| !name.starts_with('.'));
    names.sort();
    names
}

/// Accept archive-style naive timestamps (UTC implied) and RFC 3339.
fn parse_time(value: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("unparseable time {value:?}")))
}

async fn list_hours(
    State(state): State<AppState>,
    Path((channel, quality)): Path<(String, String)>,
) -> ApiResult<Json<Vec<String>>> {
    check_part(&channel)?;
    check_part(&quality)?;
    let path = state.base_dir.join(&channel).join(&quality);
    Ok(Json(visible(segments::listdir(&path)?)))
}

async fn list_segments(
    State(state): State<AppState>,
    Path((channel, quality, hour)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<String>>> {
    for part in [&channel, &quality, &hour] {
        check_part(part)?;
    }
    let path = state.base_dir.join(&channel).join(&quality).join(&hour);
    Ok(Json(visible(segments::listdir(&path)?)))
}

async fn get_segment(
    State(state): State<AppState>,
    Path((channel, quality, hour, filename)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    for part in [&channel, &quality, &hour, &filename] {
        check_part(part)?;
    }
    let path = state
        .base_dir
        .join(&channel)
        .join(&quality)
        .join(&hour)
        .join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let length = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(header::CONTENT_LENGTH, length)
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Query params passed through from the master playlist to its media
/// playlists.
#[derive(serde::Deserialize)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

async fn master_playlist(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Response> {
    let channel = target
        .strip_suffix(".m3u8")
        .ok_or(ApiError::NotFound)?
        .to_string();
    check_part(&channel)?;

    let channel_dir = state.base_dir.join(&channel);
    if !channel_dir.is_dir() {
        return Err(ApiError::NotFound);
    }
    let qualities = visible(segments::listdir(&channel_dir)?);

    let mut query = String::new();
    if let (Some(start), Some(end)) = (&range.start, &range.end) {
        query = format!("?start={start}&end={end}");
    }
    // BTreeMap for a stable variant order
    let playlists: BTreeMap<String, String> = qualities
        .into_iter()
        .map(|quality| {
            let url = format!("/playlist/{channel}/{quality}.m3u8{query}");
            (quality, url)
        })
        .collect();

    playlist_response(generate_master(
        playlists.iter().map(|(name, url)| (name.as_str(), url.clone())),
    ))
}

async fn media_playlist(
    State(state): State<AppState>,
    Path((channel, target)): Path<(String, String)>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Response> {
    let quality = target
        .strip_suffix(".m3u8")
        .ok_or(ApiError::NotFound)?
        .to_string();
    check_part(&channel)?;
    check_part(&quality)?;

    let (start, end) = required_range(&range)?;
    let best = select(&state, &channel, &quality, start, end, true).await?;
    playlist_response(generate_media(
        &best,
        &format!("/segments/{channel}/{quality}"),
    ))
}

fn playlist_response(text: String) -> ApiResult<Response> {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .body(Body::from(text))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn required_range(range: &RangeQuery) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (Some(start), Some(end)) = (&range.start, &range.end) else {
        return Err(ApiError::BadRequest(
            "start and end query parameters are required".to_string(),
        ));
    };
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    if end <= start {
        return Err(ApiError::BadRequest("end must be after start".to_string()));
    }
    Ok((start, end))
}

/// Run the selector off the async runtime.
async fn select(
    state: &AppState,
    channel: &str,
    quality: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    allow_holes: bool,
) -> ApiResult<Vec<Option<SegmentInfo>>> {
    let hours_path = state.base_dir.join(channel).join(quality);
    let best = tokio::task::spawn_blocking(move || {
        segments::best_segments(&hours_path, start, end, allow_holes)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(best)
}

#[derive(serde::Deserialize)]
struct CutQuery {
    start: Option<String>,
    end: Option<String>,
    #[serde(default)]
    allow_holes: bool,
    #[serde(rename = "type")]
    kind: Option<String>,
    /// Space-separated encoder arguments for `type=full`.
    encoder_args: Option<String>,
}

async fn cut(
    State(state): State<AppState>,
    Path((channel, target)): Path<(String, String)>,
    Query(query): Query<CutQuery>,
) -> ApiResult<Response> {
    let quality = target
        .strip_suffix(".ts")
        .ok_or(ApiError::NotFound)?
        .to_string();
    check_part(&channel)?;
    check_part(&quality)?;

    let (start, end) = required_range(&RangeQuery {
        start: query.start.clone(),
        end: query.end.clone(),
    })?;
    let kind = query.kind.as_deref().unwrap_or("fast");

    // a full cut cannot tolerate holes at all
    let allow_holes = query.allow_holes && kind != "full";
    let mut best = select(&state, &channel, &quality, start, end, allow_holes).await?;

    // edge holes just mean the range edges aren't covered; the cutters
    // expect real segments at both ends
    while best.first().is_some_and(Option::is_none) {
        best.remove(0);
    }
    while best.last().is_some_and(Option::is_none) {
        best.pop();
    }
    if best.is_empty() {
        return Err(ApiError::NotFound);
    }
    debug!(channel, quality, kind, segments = best.len(), "starting cut");

    let stream = match kind {
        "rough" => cutter::rough_cut_segments(best),
        "fast" => cutter::fast_cut_segments(best, start, end)?,
        "full" => {
            let encode_args = match &query.encoder_args {
                Some(args) => args.split_whitespace().map(str::to_string).collect(),
                None => vec!["-f".to_string(), "mpegts".to_string()],
            };
            let segments: Vec<SegmentInfo> = best.into_iter().flatten().collect();
            cutter::full_cut_segments(segments, start, end, encode_args, true)?
        }
        other => {
            return Err(ApiError::BadRequest(format!("unknown cut type {other:?}")));
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use tower::ServiceExt;

    fn write_segment(base: &std::path::Path, hour: &str, name: &str, content: &[u8]) {
        let dir = base.join("chan").join("source").join(hour);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn full_name(time: &str, hash_fill: u8) -> String {
        format!(
            "{time}-2.000-full-{}.ts",
            URL_SAFE_NO_PAD.encode([hash_fill; 32])
        )
    }

    async fn get_response(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn fixture() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let router = router(AppState {
            base_dir: dir.path().to_owned(),
        });
        (dir, router)
    }

    #[tokio::test]
    async fn listings_are_sorted_and_hide_dotfiles() {
        let (dir, router) = fixture();
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:02.000", 1), b"x");
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:00.000", 2), b"y");
        write_segment(dir.path(), "2024-01-01T00", ".hidden", b"z");

        let (status, body) = get_response(&router, "/files/chan/source").await;
        assert_eq!(status, StatusCode::OK);
        let hours: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(hours, vec!["2024-01-01T00"]);

        let (status, body) = get_response(&router, "/files/chan/source/2024-01-01T00").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names[0] < names[1]);
        assert!(!names.iter().any(|n| n.starts_with('.')));
    }

    #[tokio::test]
    async fn missing_directories_list_as_empty() {
        let (_dir, router) = fixture();
        let (status, body) = get_response(&router, "/files/chan/source/2024-01-01T00").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body, b"[]");
    }

    #[tokio::test]
    async fn dot_prefixed_parts_are_forbidden() {
        let (_dir, router) = fixture();
        for uri in [
            "/files/.secret/source",
            "/files/chan/.source/2024-01-01T00",
            "/segments/chan/source/2024-01-01T00/.hidden",
            "/playlist/.secret.m3u8",
        ] {
            let (status, _) = get_response(&router, uri).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "for {uri}");
        }
    }

    #[tokio::test]
    async fn segments_are_served_verbatim() {
        let (dir, router) = fixture();
        let name = full_name("00:00:00.000", 3);
        write_segment(dir.path(), "2024-01-01T00", &name, b"segment-body");

        let (status, body) =
            get_response(&router, &format!("/segments/chan/source/2024-01-01T00/{name}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"segment-body");

        let (status, _) =
            get_response(&router, "/segments/chan/source/2024-01-01T00/nope.ts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn master_playlist_lists_qualities() {
        let (dir, router) = fixture();
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:00.000", 1), b"x");

        let (status, body) = get_response(&router, "/playlist/chan.m3u8").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("#EXT-X-STREAM-INF:VIDEO=\"source\""));
        assert!(text.contains("/playlist/chan/source.m3u8"));

        let (status, _) = get_response(&router, "/playlist/other.m3u8").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn media_playlist_covers_requested_range() {
        let (dir, router) = fixture();
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:00.000", 1), b"a");
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:02.000", 2), b"b");

        let (status, body) = get_response(
            &router,
            "/playlist/chan/source.m3u8?start=2024-01-01T00:00:00.000&end=2024-01-01T00:00:04.000",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.matches("#EXTINF:2.000,live").count(), 2);
        assert!(!text.contains("#EXT-X-DISCONTINUITY"));

        let (status, _) = get_response(&router, "/playlist/chan/source.m3u8").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn aligned_fast_cut_concatenates_bytes() {
        let (dir, router) = fixture();
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:00.000", 1), b"AAAA");
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:02.000", 2), b"BBBB");

        let (status, body) = get_response(
            &router,
            "/cut/chan/source.ts?start=2024-01-01T00:00:00.000&end=2024-01-01T00:00:04.000",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"AAAABBBB");
    }

    #[tokio::test]
    async fn cut_with_holes_needs_allow_holes() {
        let (dir, router) = fixture();
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:00.000", 1), b"AAAA");
        write_segment(dir.path(), "2024-01-01T00", &full_name("00:00:05.000", 2), b"BBBB");

        let (status, _) = get_response(
            &router,
            "/cut/chan/source.ts?start=2024-01-01T00:00:00.000&end=2024-01-01T00:00:07.000",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);

        let (status, body) = get_response(
            &router,
            "/cut/chan/source.ts?start=2024-01-01T00:00:00.000&end=2024-01-01T00:00:07.000&allow_holes=true&type=rough",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"AAAABBBB");
    }
}
