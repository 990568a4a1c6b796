use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "streamvault",
    version,
    about = "Distributed capture-and-cut archive for live HLS streams"
)]
pub struct Args {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture configured live streams into the archive
    Downloader,

    /// Replicate segments this node is missing from its peers
    Backfiller,

    /// Serve the node's HTTP interface (listings, playlists, cuts)
    Serve,

    /// Cut a time range out of the archive to stdout or a file
    Cut {
        #[arg(long)]
        channel: String,

        #[arg(long, default_value = "source")]
        quality: String,

        /// Range start, e.g. 2024-01-01T00:00:00.000 (UTC)
        #[arg(long)]
        start: String,

        /// Range end, exclusive
        #[arg(long)]
        end: String,

        #[arg(long, value_enum, default_value_t = CutMode::Fast)]
        mode: CutMode,

        /// Tolerate discontinuities instead of failing
        #[arg(long)]
        allow_holes: bool,

        /// Encoder arguments for a full cut, space separated
        #[arg(long)]
        encoder_args: Option<String>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rewrite MPEG-TS timestamps onto a timeline starting at this
        /// many seconds
        #[arg(long)]
        rewrite_ts: Option<f64>,
    },

    /// Rewrite MPEG-TS timestamps, stdin to stdout
    Fixts {
        /// Output timeline origin in seconds
        #[arg(long, default_value_t = 0.0)]
        start_time: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CutMode {
    /// Concatenate archived bytes, trimming only the edges
    Fast,
    /// Concatenate archived bytes without any trims
    Rough,
    /// Re-encode everything through one encoder process
    Full,
}
