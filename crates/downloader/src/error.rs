use providers::ProviderError;
use segments::SegmentError;

/// Errors raised by capture workers.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("segment fetch failed with HTTP {status} for {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error(transparent)]
    Archive(#[from] SegmentError),

    #[error("quality {quality:?} was not offered by the provider")]
    QualityNotOffered { quality: String },

    #[error("too many consecutive playlist fetch failures")]
    PlaylistFetchFailures,
}
