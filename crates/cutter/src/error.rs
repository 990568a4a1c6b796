use std::process::ExitStatus;

/// Errors raised while assembling a cut.
#[derive(Debug, thiserror::Error)]
pub enum CutError {
    #[error("cut range does not line up with the given segments: {0}")]
    BadRange(&'static str),

    #[error("segment list contains a hole where none is allowed")]
    UnexpectedHole,

    #[error("I/O error during cut: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("encoder exited with {status}")]
    Subprocess { status: ExitStatus },

    #[error("ffprobe output unparseable: {reason}")]
    Probe { reason: String },
}
