use segments::SegmentError;

/// Errors raised while replicating segments from peers.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("remote request failed: {source}")]
    Remote {
        #[from]
        source: reqwest::Error,
    },

    #[error("remote request failed with HTTP {status} for {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error(transparent)]
    Archive(#[from] SegmentError),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}
