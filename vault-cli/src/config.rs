//! Service configuration: a TOML file with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use providers::ProviderSpec;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Archive root.
    pub base_dir: PathBuf,

    /// Streams to capture and serve.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// Quality names to capture per channel.
    #[serde(default = "default_qualities")]
    pub qualities: Vec<String>,

    /// Base URLs of the other nodes. May be empty.
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub downloader: DownloaderConfig,

    #[serde(default)]
    pub backfill: BackfillSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub provider: ProviderSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSection {
    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,
    #[serde(default = "default_full_interval")]
    pub full_interval_secs: u64,
    #[serde(default = "default_recent_cutoff")]
    pub recent_cutoff_secs: i64,
    /// This node's own advertised URL, filtered out of the peer list.
    #[serde(default)]
    pub node_url: Option<String>,
    /// Hour order within a pass; random avoids request collisions when
    /// several nodes backfill in parallel.
    #[serde(default = "default_order")]
    pub hour_order: backfiller::Order,
    #[serde(default = "default_order")]
    pub segment_order: backfiller::Order,
}

fn default_order() -> backfiller::Order {
    backfiller::Order::Random
}

fn default_qualities() -> Vec<String> {
    vec!["source".to_string()]
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_concurrency() -> usize {
    4
}

fn default_fast_interval() -> u64 {
    5 * 60
}

fn default_full_interval() -> u64 {
    3 * 60 * 60
}

fn default_recent_cutoff() -> i64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for BackfillSection {
    fn default() -> Self {
        Self {
            fast_interval_secs: default_fast_interval(),
            full_interval_secs: default_full_interval(),
            recent_cutoff_secs: default_recent_cutoff(),
            node_url: None,
            hour_order: default_order(),
            segment_order: default_order(),
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    ///
    /// Supported env vars: `STREAMVAULT_BASE_DIR`, `STREAMVAULT_HTTP_LISTEN`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        if let Ok(base_dir) = std::env::var("STREAMVAULT_BASE_DIR")
            && !base_dir.trim().is_empty()
        {
            config.base_dir = PathBuf::from(base_dir);
        }
        if let Ok(listen) = std::env::var("STREAMVAULT_HTTP_LISTEN")
            && !listen.trim().is_empty()
        {
            config.http.listen = listen;
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.downloader.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base_dir = "/srv/archive"
qualities = ["source", "720p60"]
peers = ["http://node2:8000"]

[http]
listen = "0.0.0.0:8000"

[[channels]]
name = "loadingreadyrun"

[channels.provider]
type = "twitch"
channel = "loadingreadyrun"

[[channels]]
name = "restream"

[channels.provider]
type = "url"
master_playlist_url = "https://example.com/master.m3u8"

[backfill]
fast_interval_secs = 120
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/archive"));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.qualities, vec!["source", "720p60"]);
        assert_eq!(config.peers, vec!["http://node2:8000"]);
        assert_eq!(config.backfill.fast_interval_secs, 120);
        // untouched sections keep their defaults
        assert_eq!(config.backfill.full_interval_secs, 3 * 60 * 60);
        assert_eq!(config.downloader.concurrency, 4);
        assert!((config.downloader.poll_interval_secs - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn provider_specs_deserialize_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(matches!(
            config.channels[0].provider,
            ProviderSpec::Twitch { .. }
        ));
        assert!(matches!(
            config.channels[1].provider,
            ProviderSpec::Url { .. }
        ));
    }
}
