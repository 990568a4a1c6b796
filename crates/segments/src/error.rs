use std::path::PathBuf;

/// Errors raised by archive and selector operations.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("bad segment path {path:?}: {reason}")]
    BadFormat { path: String, reason: String },

    #[error("segment has no {0}, cannot build an archive path")]
    MissingField(&'static str),

    #[error("requested range contains holes")]
    ContainsHoles,

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SegmentError {
    pub fn bad_format(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
