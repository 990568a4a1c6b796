use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use providers::Provider;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use backfiller::{BackfillConfig, BackfillService};
use cutter::{ByteStream, CutRequest};
use downloader::{WorkerConfig, WorkerSpec, run_workers};
use segments::SegmentInfo;
use server::AppState;
use ts_fix::TsFixer;

use crate::cli::CutMode;
use crate::config::Config;

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .context("building HTTP client")
}

pub async fn run_downloader(config: Config, token: CancellationToken) -> anyhow::Result<()> {
    let client = http_client()?;
    let mut specs = Vec::new();
    for channel in &config.channels {
        let provider: Arc<dyn Provider> = Arc::from(
            channel
                .provider
                .build(client.clone())
                .with_context(|| format!("building provider for channel {}", channel.name))?,
        );
        for quality in &config.qualities {
            specs.push(WorkerSpec {
                config: WorkerConfig {
                    base_dir: config.base_dir.clone(),
                    channel: channel.name.clone(),
                    quality: quality.clone(),
                    poll_interval: config.poll_interval(),
                    concurrency: config.downloader.concurrency,
                },
                provider: provider.clone(),
            });
        }
    }
    anyhow::ensure!(!specs.is_empty(), "no channels configured");

    info!(workers = specs.len(), "starting capture workers");
    run_workers(specs, client, token).await;
    Ok(())
}

pub async fn run_backfiller(config: Config, token: CancellationToken) -> anyhow::Result<()> {
    let peers = config
        .peers
        .iter()
        .map(|peer| Url::parse(peer).with_context(|| format!("bad peer URL {peer:?}")))
        .collect::<anyhow::Result<Vec<Url>>>()?;
    let self_url = config
        .backfill
        .node_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("bad backfill.node_url")?;

    let service = BackfillService::new(
        BackfillConfig {
            base_dir: config.base_dir.clone(),
            channels: config.channels.iter().map(|c| c.name.clone()).collect(),
            qualities: config.qualities.clone(),
            peers,
            self_url,
            fast_interval: Duration::from_secs(config.backfill.fast_interval_secs),
            full_interval: Duration::from_secs(config.backfill.full_interval_secs),
            recent_cutoff: chrono::Duration::seconds(config.backfill.recent_cutoff_secs),
            hour_order: Some(config.backfill.hour_order),
            segment_order: config.backfill.segment_order,
        },
        http_client()?,
    );
    service.run(token).await;
    Ok(())
}

pub async fn run_serve(config: Config, token: CancellationToken) -> anyhow::Result<()> {
    server::run_server(
        &config.http.listen,
        AppState {
            base_dir: config.base_dir.clone(),
        },
        token,
    )
    .await
    .context("http server failed")
}

fn parse_time(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("unparseable time {value:?}"))
}

/// Build the boundary record external callers (sheets, databases, the CLI)
/// project their richer schemas into.
pub fn cut_request(
    channel: String,
    quality: String,
    start: &str,
    end: &str,
    encoder_args: Option<&str>,
) -> anyhow::Result<CutRequest> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    anyhow::ensure!(end > start, "end must be after start");
    Ok(CutRequest {
        channel,
        quality,
        start,
        end,
        encoder_args: encoder_args
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

pub async fn run_cut(
    config: Config,
    request: CutRequest,
    mode: CutMode,
    allow_holes: bool,
    output: Option<PathBuf>,
    rewrite_ts: Option<f64>,
) -> anyhow::Result<()> {
    // a full cut cannot tolerate holes at all
    let allow_holes = allow_holes && mode != CutMode::Full;
    let hours_path = config.base_dir.join(&request.channel).join(&request.quality);
    let (start, end) = (request.start, request.end);
    let mut best = tokio::task::spawn_blocking(move || {
        segments::best_segments(&hours_path, start, end, allow_holes)
    })
    .await??;

    // edge holes just mean the range edges aren't covered
    while best.first().is_some_and(Option::is_none) {
        best.remove(0);
    }
    while best.last().is_some_and(Option::is_none) {
        best.pop();
    }
    anyhow::ensure!(!best.is_empty(), "no segments found for requested range");
    info!(segments = best.len(), "cutting");

    let stream: ByteStream = match mode {
        CutMode::Rough => cutter::rough_cut_segments(best),
        CutMode::Fast => cutter::fast_cut_segments(best, start, end)?,
        CutMode::Full => {
            let encode_args = if request.encoder_args.is_empty() {
                vec!["-f".to_string(), "mpegts".to_string()]
            } else {
                request.encoder_args.clone()
            };
            let flat: Vec<SegmentInfo> = best.into_iter().flatten().collect();
            // buffered output when writing a file, so non-streamable
            // containers work; streamed otherwise
            cutter::full_cut_segments(flat, start, end, encode_args, output.is_none())?
        }
    };

    write_stream(stream, output, rewrite_ts).await
}

async fn write_stream(
    mut stream: ByteStream,
    output: Option<PathBuf>,
    rewrite_ts: Option<f64>,
) -> anyhow::Result<()> {
    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin> = match &output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut fixer = rewrite_ts.map(TsFixer::new);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match &mut fixer {
            Some(fixer) => sink.write_all(&fixer.feed(&chunk)?).await?,
            None => sink.write_all(&chunk).await?,
        }
    }
    if let Some(fixer) = fixer {
        let end_time = fixer.end()?;
        info!(end_time, "rewrote output timeline");
    }
    sink.flush().await?;
    Ok(())
}

pub async fn run_fixts(start_time: f64) -> anyhow::Result<()> {
    let mut fixer = TsFixer::new(start_time);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&fixer.feed(&buf[..n])?).await?;
    }
    stdout.flush().await?;
    let end_time = fixer.end()?;
    eprintln!("{end_time}");
    Ok(())
}
