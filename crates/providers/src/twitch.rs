//! Twitch provider: access-token handshake plus usher master playlist.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{AlternativeMediaType, MasterPlaylist};
use rand::RngExt;
use reqwest::Client;
use tracing::warn;
use url::Url;

use crate::error::ProviderError;
use crate::provider::{PLAYLIST_TIMEOUT, Provider, check_status, parse_master};

const GQL_URL: &str = "https://gql.twitch.tv/gql";
const USHER_URL: &str = "https://usher.ttvnw.net/api/channel/hls";
const CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";
const PLAYER_URL: &str = "https://player.twitch.tv";
const ACCESS_TOKEN_QUERY_HASH: &str =
    "0828119ded1c13477966434e15800ff57ddacf13ba1911c129dc2200705b0712";

/// Provider that takes a twitch channel.
pub struct TwitchProvider {
    channel: String,
    auth_token: Option<String>,
    client: Client,
}

impl TwitchProvider {
    pub fn new(channel: String, auth_token: Option<String>, client: Client) -> Self {
        Self {
            channel,
            auth_token,
            client,
        }
    }

    /// Fetch a signed playback access token via the persisted GQL query.
    async fn access_token(&self) -> Result<(String, String), ProviderError> {
        let body = serde_json::json!({
            "operationName": "PlaybackAccessToken",
            "extensions": {
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": ACCESS_TOKEN_QUERY_HASH,
                }
            },
            "variables": {
                "isLive": true,
                "login": self.channel,
                "isVod": false,
                "vodID": "",
                "playerType": "site",
            },
        });

        let mut request = self
            .client
            .post(GQL_URL)
            .timeout(PLAYLIST_TIMEOUT)
            .header("Client-ID", CLIENT_ID)
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("OAuth {token}"));
        }

        let response = check_status(request.send().await?, "twitch_get_access_token")?;
        let data: serde_json::Value = response.json().await?;
        let token = data
            .pointer("/data/streamPlaybackAccessToken")
            .ok_or_else(|| ProviderError::access_token("no streamPlaybackAccessToken in response"))?;
        let signature = token
            .get("signature")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::access_token("no signature in access token"))?;
        let value = token
            .get("value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::access_token("no value in access token"))?;
        Ok((signature.to_string(), value.to_string()))
    }

    async fn master_playlist(&self) -> Result<(MasterPlaylist, Url), ProviderError> {
        let (sig, token) = self.access_token().await?;
        // Params taken from streamlink. Unsure what's needed and what
        // changing things can do.
        let p: u32 = rand::rng().random_range(0..1_000_000);
        let response = self
            .client
            .get(format!("{USHER_URL}/{}.m3u8", self.channel))
            .timeout(PLAYLIST_TIMEOUT)
            .header(reqwest::header::REFERER, PLAYER_URL)
            .header(reqwest::header::ORIGIN, PLAYER_URL)
            .query(&[
                ("player", "twitchweb"),
                ("p", p.to_string().as_str()),
                ("type", "any"),
                ("allow_source", "true"),
                ("allow_audio_only", "true"),
                ("allow_spectre", "false"),
                ("fast_bread", "true"),
                ("sig", sig.as_str()),
                ("token", token.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response, "twitch_get_master_playlist")?;
        let final_url = response.url().clone();
        let bytes = response.bytes().await?;
        Ok((parse_master(&bytes)?, final_url))
    }
}

#[async_trait]
impl Provider for TwitchProvider {
    fn client(&self) -> &Client {
        &self.client
    }

    fn max_worker_age(&self) -> Duration {
        // Twitch links expire after 24h, so roll workers at 20h
        Duration::from_secs(20 * 60 * 60)
    }

    async fn media_playlist_uris(
        &self,
        qualities: &[String],
    ) -> Result<HashMap<String, Url>, ProviderError> {
        let (master, base) = self.master_playlist().await?;
        select_variant_uris(&master, &base, qualities)
    }
}

/// Pick media playlist URIs out of a twitch master playlist.
///
/// Twitch master playlists are observed to have the following form: the
/// first listed variant is the source playlist and its single VIDEO
/// rendition's name contains "(source)". Transcoded variants follow, named
/// like `720p60`/`480p`, then `audio_only`. Renditions carry the name but no
/// URI of their own; the variant entry's URI is the one to use. We return
/// the source stream in addition to any requested quality that is found, so
/// `audio_only` is never picked up unless explicitly named.
pub(crate) fn select_variant_uris(
    master: &MasterPlaylist,
    base: &Url,
    target_qualities: &[String],
) -> Result<HashMap<String, Url>, ProviderError> {
    if master.variants.is_empty() {
        return Err(ProviderError::playlist("master playlist has no variants"));
    }

    let mut by_name: HashMap<String, &m3u8_rs::VariantStream> = HashMap::new();
    for variant in &master.variants {
        let renditions: Vec<_> = master
            .alternatives
            .iter()
            .filter(|media| {
                media.media_type == AlternativeMediaType::Video
                    && Some(&media.group_id) == variant.video.as_ref()
            })
            .collect();

        if renditions.iter().any(|media| media.uri.is_some()) {
            warn!(uri = %variant.uri, "variant has a rendition with its own URI");
        }

        let names: BTreeSet<&str> = renditions
            .iter()
            .map(|media| media.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();
        let Some(name) = names.iter().next().copied() else {
            warn!(uri = %variant.uri, "variant has no named video renditions, can't determine name");
            continue;
        };
        if names.len() > 1 {
            warn!(uri = %variant.uri, "variant has multiple possible names, picking one arbitrarily");
        }
        by_name.insert(name.to_string(), variant);
    }

    let source_candidates: Vec<&str> = by_name
        .keys()
        .filter(|name| name.contains("(source)"))
        .map(String::as_str)
        .collect();
    let [source_name] = source_candidates.as_slice() else {
        return Err(ProviderError::playlist(format!(
            "can't find source stream, not exactly one candidate: {source_candidates:?}"
        )));
    };
    let source_name = source_name.to_string();

    let resolve = |variant: &m3u8_rs::VariantStream| -> Result<Url, ProviderError> {
        base.join(&variant.uri)
            .map_err(|e| ProviderError::playlist(format!("bad variant URI {:?}: {e}", variant.uri)))
    };

    let mut uris = HashMap::new();
    for (name, variant) in &by_name {
        if target_qualities.contains(name) {
            uris.insert(name.clone(), resolve(variant)?);
        }
    }
    uris.insert("source".to_string(), resolve(by_name[&source_name])?);
    Ok(uris)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"chunked\",NAME=\"1080p60 (source)\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=6000000,RESOLUTION=1920x1080,CODECS=\"avc1.64002A,mp4a.40.2\",VIDEO=\"chunked\"\n\
https://usher.example.com/chunked/index.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"720p60\",NAME=\"720p60\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720,VIDEO=\"720p60\"\n\
https://usher.example.com/720p60/index.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"audio_only\",NAME=\"audio_only\",AUTOSELECT=NO,DEFAULT=NO\n\
#EXT-X-STREAM-INF:BANDWIDTH=160000,VIDEO=\"audio_only\"\n\
https://usher.example.com/audio_only/index.m3u8\n";

    fn master() -> MasterPlaylist {
        parse_master(MASTER.as_bytes()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://usher.example.com/").unwrap()
    }

    #[test]
    fn source_is_always_selected() {
        let uris = select_variant_uris(&master(), &base(), &[]).unwrap();
        assert_eq!(uris.len(), 1);
        assert_eq!(
            uris["source"].as_str(),
            "https://usher.example.com/chunked/index.m3u8"
        );
    }

    #[test]
    fn requested_qualities_are_included() {
        let uris =
            select_variant_uris(&master(), &base(), &["720p60".to_string()]).unwrap();
        assert_eq!(uris.len(), 2);
        assert_eq!(
            uris["720p60"].as_str(),
            "https://usher.example.com/720p60/index.m3u8"
        );
    }

    #[test]
    fn audio_only_requires_explicit_request() {
        let uris = select_variant_uris(&master(), &base(), &["480p".to_string()]).unwrap();
        assert!(!uris.contains_key("audio_only"));

        let uris =
            select_variant_uris(&master(), &base(), &["audio_only".to_string()]).unwrap();
        assert!(uris.contains_key("audio_only"));
    }

    #[test]
    fn missing_source_rendition_is_an_error() {
        let text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"720p60\",NAME=\"720p60\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=3000000,VIDEO=\"720p60\"\n\
https://usher.example.com/720p60/index.m3u8\n";
        let master = parse_master(text.as_bytes()).unwrap();
        assert!(matches!(
            select_variant_uris(&master, &base(), &[]),
            Err(ProviderError::Playlist { .. })
        ));
    }
}
