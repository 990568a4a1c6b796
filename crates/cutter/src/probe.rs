//! ffprobe wrapper: stream layout of a segment file.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::CutError;

#[derive(Debug, Clone, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

/// Ask ffprobe for the streams in a media file, sorted by index.
pub async fn streams_info(path: &Path) -> Result<Vec<StreamInfo>, CutError> {
    let output = Command::new("ffprobe")
        .args(["-hide_banner", "-loglevel", "fatal", "-of", "json", "-show_streams"])
        .arg(path)
        .output()
        .await?;
    if !output.status.success() {
        return Err(CutError::Subprocess {
            status: output.status,
        });
    }
    let probe: ProbeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
        CutError::Probe {
            reason: e.to_string(),
        }
    })?;
    let mut streams = probe.streams;
    // output is generally already sorted, but the order of map args matters
    streams.sort_by_key(|stream| stream.index);
    Ok(streams)
}
