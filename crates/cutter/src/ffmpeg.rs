//! ffmpeg argv construction and spawning.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::CutError;
use crate::probe::StreamInfo;

/// Arguments for cutting a single segment in place: copy every stream with
/// its original codec in its original position, trim, emit MPEG-TS on
/// stdout.
pub(crate) fn cut_segment_args(
    streams: &[StreamInfo],
    path: &Path,
    cut_start: Option<f64>,
    cut_end: Option<f64>,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path.display().to_string(),
    ];
    for stream in streams {
        // map the same stream in the same position from input to output
        args.push("-map".to_string());
        args.push(format!("0:{}", stream.index));
        if matches!(stream.codec_type.as_deref(), Some("video") | Some("audio"))
            && let Some(codec) = stream.codec_name.as_deref()
        {
            // metadata streams are weirder; ffmpeg does the right thing there
            args.push(format!("-codec:{}", stream.index));
            args.push(codec.to_string());
        }
    }
    if let Some(cut_start) = cut_start {
        args.push("-ss".to_string());
        args.push(cut_start.to_string());
    }
    if let Some(cut_end) = cut_end {
        args.push("-to".to_string());
        args.push(cut_end.to_string());
    }
    args.extend(["-f".to_string(), "mpegts".to_string(), "-".to_string()]);
    args
}

/// Arguments for the full cut: read MPEG-TS from stdin, trim, then apply the
/// caller's encoder arguments.
pub(crate) fn cut_stdin_args(
    cut_start: f64,
    duration: f64,
    encode_args: &[String],
    seekable_output: bool,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-ss".to_string(),
        cut_start.to_string(),
        "-t".to_string(),
        duration.to_string(),
    ];
    args.extend(encode_args.iter().cloned());
    if seekable_output {
        // ffmpeg assumes '-' is unseekable. Writing to its own stdout via
        // the /proc/self fd keeps the seekability of the backing temp file;
        // the fd "already exists", hence -y.
        args.push("/proc/self/fd/1".to_string());
        args.push("-y".to_string());
    } else {
        args.push("-".to_string());
    }
    args
}

/// Spawn ffmpeg with stdout captured and the given stdin/stdout overrides.
pub(crate) fn spawn_ffmpeg(
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child, CutError> {
    tracing::info!(args = %args.join(" "), "running ffmpeg");
    let child = Command::new("ffmpeg")
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .kill_on_drop(true)
        .spawn()?;
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams() -> Vec<StreamInfo> {
        vec![
            StreamInfo {
                index: 0,
                codec_type: Some("video".to_string()),
                codec_name: Some("h264".to_string()),
            },
            StreamInfo {
                index: 1,
                codec_type: Some("audio".to_string()),
                codec_name: Some("aac".to_string()),
            },
            StreamInfo {
                index: 2,
                codec_type: Some("data".to_string()),
                codec_name: Some("timed_id3".to_string()),
            },
        ]
    }

    #[test]
    fn segment_trim_maps_streams_with_codecs() {
        let args = cut_segment_args(
            &streams(),
            Path::new("/archive/seg.ts"),
            Some(1.0),
            Some(4.0),
        );
        let expected: Vec<&str> = vec![
            "-hide_banner", "-loglevel", "error",
            "-i", "/archive/seg.ts",
            "-map", "0:0", "-codec:0", "h264",
            "-map", "0:1", "-codec:1", "aac",
            "-map", "0:2",
            "-ss", "1",
            "-to", "4",
            "-f", "mpegts", "-",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn trim_args_are_omitted_when_unset() {
        let args = cut_segment_args(&streams(), Path::new("/a.ts"), None, Some(2.5));
        assert!(!args.contains(&"-ss".to_string()));
        let to_pos = args.iter().position(|a| a == "-to").unwrap();
        assert_eq!(args[to_pos + 1], "2.5");
    }

    #[test]
    fn stdin_cut_streams_to_stdout_by_default() {
        let args = cut_stdin_args(1.0, 3.0, &["-f".to_string(), "mpegts".to_string()], false);
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error",
                "-i", "-",
                "-ss", "1",
                "-t", "3",
                "-f", "mpegts",
                "-",
            ],
        );
    }

    #[test]
    fn stdin_cut_uses_seekable_fd_for_buffered_output() {
        let args = cut_stdin_args(0.0, 3.0, &["-f".to_string(), "mp4".to_string()], true);
        assert!(args.ends_with(&["/proc/self/fd/1".to_string(), "-y".to_string()]));
    }
}
