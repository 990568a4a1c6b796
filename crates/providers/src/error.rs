use reqwest::StatusCode;

/// Errors raised while resolving or fetching playlists.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation}")]
    HttpStatus {
        status: StatusCode,
        operation: &'static str,
    },

    #[error("invalid URL {input:?}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("cannot provide quality {quality:?}")]
    QualityUnavailable { quality: String },

    #[error("access token error: {reason}")]
    AccessToken { reason: String },
}

impl ProviderError {
    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn access_token(reason: impl Into<String>) -> Self {
        Self::AccessToken {
            reason: reason.into(),
        }
    }
}
