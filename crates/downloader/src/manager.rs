//! Supervision of the full set of capture workers.

use std::sync::Arc;
use std::time::Duration;

use providers::Provider;
use reqwest::Client;
use segments::jitter;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::worker::{CaptureWorker, WorkerConfig};

/// Backoff between worker restarts after a resolve or poll-loop failure.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// One (channel, quality) capture assignment.
pub struct WorkerSpec {
    pub config: WorkerConfig,
    pub provider: Arc<dyn Provider>,
}

/// Spawn a worker per spec and keep them alive until cancellation.
///
/// A worker that returns an error (provider offline, playlist kept failing)
/// is restarted after a jittered backoff; stream-offline periods show up as
/// that restart loop.
pub async fn run_workers(specs: Vec<WorkerSpec>, client: Client, token: CancellationToken) {
    let mut workers = JoinSet::new();
    for spec in specs {
        let client = client.clone();
        let token = token.clone();
        workers.spawn(async move {
            let channel = spec.config.channel.clone();
            let quality = spec.config.quality.clone();
            let worker = CaptureWorker::new(spec.config, spec.provider, client, token.clone());
            loop {
                match worker.run().await {
                    Ok(()) => break, // cancelled
                    Err(e) => {
                        error!(
                            channel = %channel,
                            quality = %quality,
                            error = %e,
                            "capture worker failed, restarting",
                        );
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(jitter(RESTART_BACKOFF)) => {}
                }
            }
            info!(channel = %channel, quality = %quality, "capture worker stopped");
        });
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "capture worker task panicked");
        }
    }
}
