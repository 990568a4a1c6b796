//! The two-cadence backfill service.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use segments::jitter;

use crate::backfill::{BackfillNodeOptions, HourSelection, Order, backfill_node};
use crate::client::PeerClient;

/// Hours covered by the fast cadence.
const FAST_PASS_HOURS: u32 = 3;

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub base_dir: PathBuf,
    pub channels: Vec<String>,
    pub qualities: Vec<String>,
    pub peers: Vec<Url>,
    /// Our own advertised URL, filtered out of the peer list.
    pub self_url: Option<Url>,
    /// Fast cadence: the last few hours, frequently.
    pub fast_interval: Duration,
    /// Full cadence: everything, occasionally.
    pub full_interval: Duration,
    pub recent_cutoff: chrono::Duration,
    /// `None` keeps hours in the order the selection produced.
    pub hour_order: Option<Order>,
    pub segment_order: Order,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            channels: Vec::new(),
            qualities: Vec::new(),
            peers: Vec::new(),
            self_url: None,
            fast_interval: Duration::from_secs(5 * 60),
            full_interval: Duration::from_secs(3 * 60 * 60),
            recent_cutoff: chrono::Duration::seconds(60),
            hour_order: Some(Order::Random),
            segment_order: Order::Random,
        }
    }
}

/// Periodically copies segments this node is missing from its peers.
///
/// Two cadences run concurrently: a fast pass over the last few hours and a
/// full pass over all hours. A per-peer lock keeps passes from overlapping
/// on the same peer; peers are otherwise processed in parallel with failures
/// isolated per peer.
pub struct BackfillService {
    config: BackfillConfig,
    client: Client,
    peer_locks: HashMap<Url, Arc<Mutex<()>>>,
}

impl BackfillService {
    pub fn new(config: BackfillConfig, client: Client) -> Self {
        let peer_locks = config
            .peers
            .iter()
            .filter(|peer| config.self_url.as_ref() != Some(*peer))
            .map(|peer| (peer.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            config,
            client,
            peer_locks,
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        if self.peer_locks.is_empty() {
            info!("no peers configured, backfiller idle");
            token.cancelled().await;
            return;
        }

        let fast = async {
            loop {
                self.pass(HourSelection::LastHours(FAST_PASS_HOURS)).await;
                tokio::time::sleep(jitter(self.config.fast_interval)).await;
            }
        };
        let full = async {
            loop {
                self.pass(HourSelection::All).await;
                tokio::time::sleep(jitter(self.config.full_interval)).await;
            }
        };

        tokio::select! {
            _ = token.cancelled() => info!("backfiller shutting down"),
            _ = async { tokio::join!(fast, full) } => unreachable!("cadence loops never return"),
        }
    }

    /// One pass over every peer, in parallel.
    async fn pass(&self, hours: HourSelection) {
        let options = BackfillNodeOptions {
            hours,
            hour_order: self.config.hour_order,
            segment_order: self.config.segment_order,
            recent_cutoff: self.config.recent_cutoff,
        };

        let mut passes = JoinSet::new();
        for (peer_url, lock) in &self.peer_locks {
            let peer = PeerClient::new(peer_url.clone(), self.client.clone());
            let lock = lock.clone();
            let options = options.clone();
            let base_dir = self.config.base_dir.clone();
            let channels = self.config.channels.clone();
            let qualities = self.config.qualities.clone();
            passes.spawn(async move {
                let _guard = lock.lock().await;
                for channel in &channels {
                    if let Err(e) =
                        backfill_node(&base_dir, &peer, channel, &qualities, &options).await
                    {
                        error!(
                            peer = %peer.base_url(),
                            channel,
                            error = %e,
                            "error while backfilling node",
                        );
                    }
                }
            });
        }
        while let Some(result) = passes.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "backfill pass panicked");
            }
        }
    }
}
