//! One capture worker per (channel, quality) pair.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use moka::future::Cache;
use providers::{MediaPlaylistFetch, PlaylistEntry, Provider};
use reqwest::Client;
use segments::jitter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::DownloadError;
use crate::fetch::download_segment;

/// Sliding window of segment URIs we have already acted on.
const SEEN_URI_CAPACITY: u64 = 1000;

/// Give up on a media playlist URL after this many consecutive fetch
/// failures and resolve a fresh one.
const MAX_PLAYLIST_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub base_dir: PathBuf,
    pub channel: String,
    pub quality: String,
    /// Media playlist poll interval, jittered +/- 10%.
    pub poll_interval: std::time::Duration,
    /// Concurrent segment downloads per worker.
    pub concurrency: usize,
}

/// Polls one media playlist and downloads every new segment it lists.
pub struct CaptureWorker {
    config: WorkerConfig,
    provider: Arc<dyn Provider>,
    client: Client,
    token: CancellationToken,
}

impl CaptureWorker {
    pub fn new(
        config: WorkerConfig,
        provider: Arc<dyn Provider>,
        client: Client,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            client,
            token,
        }
    }

    /// Run until cancelled. Re-resolves the media playlist URL whenever it
    /// ages out, the playlist ends, or fetching it keeps failing.
    pub async fn run(&self) -> Result<(), DownloadError> {
        while !self.token.is_cancelled() {
            let playlist_url = self.resolve().await?;
            info!(
                channel = %self.config.channel,
                quality = %self.config.quality,
                url = %playlist_url,
                "capture worker resolved media playlist",
            );
            self.capture(playlist_url).await?;
        }
        Ok(())
    }

    async fn resolve(&self) -> Result<Url, DownloadError> {
        let uris = self
            .provider
            .media_playlist_uris(std::slice::from_ref(&self.config.quality))
            .await?;
        uris.get(&self.config.quality)
            .cloned()
            .ok_or_else(|| DownloadError::QualityNotOffered {
                quality: self.config.quality.clone(),
            })
    }

    /// Poll one media playlist URL for as long as it is valid.
    async fn capture(&self, playlist_url: Url) -> Result<(), DownloadError> {
        let resolved_at = Instant::now();
        let max_age = self.provider.max_worker_age();
        let seen: Cache<String, ()> = Cache::new(SEEN_URI_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut downloads: JoinSet<()> = JoinSet::new();
        let mut consecutive_failures = 0u32;

        loop {
            if self.token.is_cancelled() {
                break;
            }
            if resolved_at.elapsed() > max_age {
                info!(
                    channel = %self.config.channel,
                    quality = %self.config.quality,
                    "media playlist URL exceeded max worker age, re-resolving",
                );
                break;
            }

            match self.provider.media_playlist(&playlist_url).await {
                Ok(fetch) => {
                    consecutive_failures = 0;
                    let ended = fetch.ended;
                    self.spawn_downloads(&seen, &semaphore, &mut downloads, fetch)
                        .await;
                    if ended {
                        info!(
                            channel = %self.config.channel,
                            quality = %self.config.quality,
                            "media playlist ended, re-resolving",
                        );
                        break;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        channel = %self.config.channel,
                        error = %e,
                        failures = consecutive_failures,
                        "failed to fetch media playlist",
                    );
                    if consecutive_failures >= MAX_PLAYLIST_FAILURES {
                        drain(&mut downloads).await;
                        return Err(DownloadError::PlaylistFetchFailures);
                    }
                }
            }

            // reap whatever finished; failures were already logged per task
            while downloads.try_join_next().is_some() {}

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(jitter(self.config.poll_interval)) => {}
            }
        }

        drain(&mut downloads).await;
        Ok(())
    }

    async fn spawn_downloads(
        &self,
        seen: &Cache<String, ()>,
        semaphore: &Arc<Semaphore>,
        downloads: &mut JoinSet<()>,
        fetch: MediaPlaylistFetch,
    ) {
        for entry in filter_new_entries(seen, fetch.entries).await {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let client = self.client.clone();
            let config = self.config.clone();
            downloads.spawn(async move {
                let _permit = permit;
                if let Err(e) = download_segment(
                    &client,
                    &config.base_dir,
                    &config.channel,
                    &config.quality,
                    &entry,
                )
                .await
                {
                    // Transient failure: the segment gets another chance only
                    // if a later poll still lists a URI we haven't seen.
                    warn!(uri = %entry.uri, error = %e, "segment download failed");
                } else {
                    debug!(uri = %entry.uri, "segment download complete");
                }
            });
        }
    }
}

/// Keep the entries we have not acted on yet, marking every listed URI as
/// seen whether or not its download will succeed (failure loops must not
/// turn into re-download loops). Undated entries cannot be archived and are
/// dropped with a warning.
async fn filter_new_entries(
    seen: &Cache<String, ()>,
    entries: Vec<PlaylistEntry>,
) -> Vec<PlaylistEntry> {
    let mut new_entries = Vec::new();
    for entry in entries {
        let key = entry.uri.to_string();
        if seen.contains_key(&key) {
            continue;
        }
        seen.insert(key, ()).await;
        if entry.date.is_none() {
            warn!(uri = %entry.uri, "segment has no date given, skipping");
            continue;
        }
        new_entries.push(entry);
    }
    new_entries
}

async fn drain(downloads: &mut JoinSet<()>) {
    while let Some(result) = downloads.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "segment download task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(name: &str, dated: bool) -> PlaylistEntry {
        PlaylistEntry {
            uri: Url::parse(&format!("https://example.com/{name}")).unwrap(),
            date: dated.then(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            duration: chrono::Duration::milliseconds(2000),
        }
    }

    #[tokio::test]
    async fn seen_uris_are_downloaded_once() {
        let seen: Cache<String, ()> = Cache::new(SEEN_URI_CAPACITY);

        let first = filter_new_entries(&seen, vec![entry("a.ts", true), entry("b.ts", true)]).await;
        assert_eq!(first.len(), 2);

        // overlapping poll: only the fresh entry comes back
        let second = filter_new_entries(&seen, vec![entry("b.ts", true), entry("c.ts", true)]).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].uri.path(), "/c.ts");
    }

    #[tokio::test]
    async fn undated_entries_are_skipped_but_marked_seen() {
        let seen: Cache<String, ()> = Cache::new(SEEN_URI_CAPACITY);

        let first = filter_new_entries(&seen, vec![entry("a.ts", false)]).await;
        assert!(first.is_empty());

        // still skipped on the next poll, without re-warning forever
        let second = filter_new_entries(&seen, vec![entry("a.ts", false)]).await;
        assert!(second.is_empty());
    }
}
