//! HTTP client for one peer node's archive listing interface.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::BackfillError;

/// Timeout for hour/segment listings.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout covering one whole segment body.
const SEGMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A peer node exposing `/files` listings and `/segments` bodies.
pub struct PeerClient {
    base_url: Url,
    client: Client,
}

impl PeerClient {
    pub fn new(base_url: Url, client: Client) -> Self {
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, BackfillError> {
        self.base_url
            .join(path)
            .map_err(|_| BackfillError::HttpStatus {
                status: reqwest::StatusCode::BAD_REQUEST,
                url: format!("{}{}", self.base_url, path),
            })
    }

    async fn list(&self, url: Url) -> Result<Vec<String>, BackfillError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Hour directory names the peer has for this channel/quality.
    pub async fn list_hours(
        &self,
        channel: &str,
        quality: &str,
    ) -> Result<Vec<String>, BackfillError> {
        let url = self.url(&format!("files/{channel}/{quality}"))?;
        debug!(url = %url, "listing remote hours");
        self.list(url).await
    }

    /// Segment filenames the peer has for this hour.
    pub async fn list_segments(
        &self,
        channel: &str,
        quality: &str,
        hour: &str,
    ) -> Result<Vec<String>, BackfillError> {
        let url = self.url(&format!("files/{channel}/{quality}/{hour}"))?;
        debug!(url = %url, "listing remote segments");
        self.list(url).await
    }

    /// Fetch one segment body into `dest`, via a temp sibling + rename.
    ///
    /// Does nothing if `dest` already exists (the downloader may have won
    /// the race since the local listing was taken).
    pub async fn fetch_segment(
        &self,
        channel: &str,
        quality: &str,
        hour: &str,
        name: &str,
        dest: &Path,
    ) -> Result<(), BackfillError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Ok(());
        }

        let url = self.url(&format!("segments/{channel}/{quality}/{hour}/{name}"))?;
        debug!(url = %url, "fetching remote segment");
        let response = self
            .client
            .get(url.clone())
            .timeout(SEGMENT_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        segments::ensure_directory(dest).map_err(|e| BackfillError::Io {
            path: dest.to_owned(),
            source: e,
        })?;
        let temp_path = {
            let mut name = dest.as_os_str().to_owned();
            name.push(format!(".{}.temp", Uuid::new_v4()));
            std::path::PathBuf::from(name)
        };

        let result: Result<(), BackfillError> = async {
            let mut file =
                tokio::fs::File::create(&temp_path)
                    .await
                    .map_err(|e| BackfillError::Io {
                        path: temp_path.clone(),
                        source: e,
                    })?;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await.map_err(|e| BackfillError::Io {
                    path: temp_path.clone(),
                    source: e,
                })?;
            }
            file.flush().await.map_err(|e| BackfillError::Io {
                path: temp_path.clone(),
                source: e,
            })?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        segments::rename(&temp_path, dest).map_err(|e| BackfillError::Io {
            path: dest.to_owned(),
            source: e,
        })
    }
}
