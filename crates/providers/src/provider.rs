//! Provider capability: resolving media playlist URLs for a stream.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::ProviderError;
use crate::playlist::{MediaPlaylistFetch, parse_media_playlist};
use crate::twitch::TwitchProvider;

/// Timeout for playlist-sized fetches.
pub const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(5);

/// A source of media playlists for one upstream stream.
///
/// Providers resolve a master playlist into per-quality media playlist URLs
/// and know how long such a URL stays usable before it must be re-resolved
/// (some providers sign URLs with an expiry).
#[async_trait]
pub trait Provider: Send + Sync {
    fn client(&self) -> &Client;

    /// How long a media playlist URL may stay in use before a worker must
    /// resolve a fresh one.
    fn max_worker_age(&self) -> Duration;

    /// Fetch the master playlist and return the media playlist URL for each
    /// requested quality.
    async fn media_playlist_uris(
        &self,
        qualities: &[String],
    ) -> Result<HashMap<String, Url>, ProviderError>;

    /// Fetch and parse a media playlist. A plain fetch for most providers.
    async fn media_playlist(&self, uri: &Url) -> Result<MediaPlaylistFetch, ProviderError> {
        let response = self
            .client()
            .get(uri.clone())
            .timeout(PLAYLIST_TIMEOUT)
            .send()
            .await?;
        let response = check_status(response, "get_media_playlist")?;
        let final_url = response.url().clone();
        let bytes = response.bytes().await?;
        parse_media_playlist(&bytes, &final_url)
    }
}

pub(crate) fn check_status(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ProviderError::HttpStatus { status, operation })
    }
}

pub(crate) fn parse_master(content: &[u8]) -> Result<m3u8_rs::MasterPlaylist, ProviderError> {
    match m3u8_rs::parse_playlist_res(content) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(playlist)) => Ok(playlist),
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => Err(ProviderError::playlist(
            "expected master playlist, got media playlist",
        )),
        Err(e) => Err(ProviderError::playlist(format!(
            "failed to parse master playlist: {e}"
        ))),
    }
}

/// Provider that takes an arbitrary master playlist URL.
///
/// Doesn't support multiple renditions; the only quality is `source`, mapped
/// to the first variant.
pub struct UrlProvider {
    master_playlist_url: Url,
    client: Client,
}

impl UrlProvider {
    pub fn new(master_playlist_url: Url, client: Client) -> Self {
        Self {
            master_playlist_url,
            client,
        }
    }
}

#[async_trait]
impl Provider for UrlProvider {
    fn client(&self) -> &Client {
        &self.client
    }

    fn max_worker_age(&self) -> Duration {
        // effectively unbounded
        Duration::from_secs(30 * 24 * 60 * 60)
    }

    async fn media_playlist_uris(
        &self,
        qualities: &[String],
    ) -> Result<HashMap<String, Url>, ProviderError> {
        if let Some(quality) = qualities.iter().find(|q| q.as_str() != "source") {
            return Err(ProviderError::QualityUnavailable {
                quality: quality.clone(),
            });
        }

        let response = self
            .client
            .get(self.master_playlist_url.clone())
            .timeout(PLAYLIST_TIMEOUT)
            .send()
            .await?;
        let response = check_status(response, "url_master_playlist")?;
        let final_url = response.url().clone();
        let bytes = response.bytes().await?;
        let master = parse_master(&bytes)?;

        let first = master
            .variants
            .first()
            .ok_or_else(|| ProviderError::playlist("master playlist has no variants"))?;
        let uri = final_url
            .join(&first.uri)
            .map_err(|e| ProviderError::playlist(format!("bad variant URI {:?}: {e}", first.uri)))?;
        Ok(HashMap::from([("source".to_string(), uri)]))
    }
}

/// Per-channel provider configuration, as it appears in the config file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSpec {
    /// Static master playlist URL; `source` quality only.
    Url { master_playlist_url: String },
    /// Twitch channel with the token handshake.
    Twitch {
        channel: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl ProviderSpec {
    pub fn build(&self, client: Client) -> Result<Box<dyn Provider>, ProviderError> {
        match self {
            ProviderSpec::Url {
                master_playlist_url,
            } => {
                let url = Url::parse(master_playlist_url).map_err(|e| {
                    ProviderError::InvalidUrl {
                        input: master_playlist_url.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Box::new(UrlProvider::new(url, client)))
            }
            ProviderSpec::Twitch {
                channel,
                auth_token,
            } => Ok(Box::new(TwitchProvider::new(
                channel.clone(),
                auth_token.clone(),
                client,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn url_provider_rejects_non_source_qualities() {
        let provider = UrlProvider::new(
            Url::parse("https://example.com/master.m3u8").unwrap(),
            Client::new(),
        );
        let result = provider
            .media_playlist_uris(&["720p60".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::QualityUnavailable { quality }) if quality == "720p60"
        ));
    }

    #[test]
    fn provider_spec_builds_from_config() {
        let spec: ProviderSpec = serde_json::from_value(serde_json::json!({
            "type": "twitch",
            "channel": "somechannel",
        }))
        .unwrap();
        assert!(
            matches!(spec, ProviderSpec::Twitch { ref channel, .. } if channel == "somechannel")
        );
        spec.build(Client::new()).unwrap();

        let spec: ProviderSpec = serde_json::from_value(serde_json::json!({
            "type": "url",
            "master_playlist_url": "https://example.com/master.m3u8",
        }))
        .unwrap();
        spec.build(Client::new()).unwrap();
    }
}
