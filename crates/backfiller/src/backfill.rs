//! One backfill pass against one peer.

use std::collections::HashSet;
use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use segments::{SegmentKind, hour_str, listdir, parse_segment_path};

use crate::client::PeerClient;
use crate::error::BackfillError;

/// Ordering applied to hours and to segments within an hour. `Random` is the
/// right choice when several nodes backfill in parallel, so they don't all
/// hammer the same hour of the same peer at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Forward,
    Reverse,
    Random,
}

impl Order {
    fn apply(self, names: &mut [String]) {
        match self {
            Order::Forward => names.sort(),
            Order::Reverse => {
                names.sort();
                names.reverse();
            }
            Order::Random => names.shuffle(&mut rand::rng()),
        }
    }
}

/// Which hours a pass should consider.
#[derive(Debug, Clone)]
pub enum HourSelection {
    /// The last `n` hours, newest first, derived from the clock.
    LastHours(u32),
    /// Everything the peer has.
    All,
    /// An explicit set of hour names.
    Explicit(Vec<String>),
    /// Hours within `[start, stop]` (inclusive, hour-name strings).
    Range { start: String, stop: String },
}

#[derive(Debug, Clone)]
pub struct BackfillNodeOptions {
    pub hours: HourSelection,
    /// `None` keeps the hours in whatever order the selection produced.
    pub hour_order: Option<Order>,
    pub segment_order: Order,
    /// Skip segments younger than this, to stay out of the downloader's way.
    pub recent_cutoff: ChronoDuration,
}

impl Default for BackfillNodeOptions {
    fn default() -> Self {
        Self {
            hours: HourSelection::All,
            hour_order: Some(Order::Random),
            segment_order: Order::Random,
            recent_cutoff: ChronoDuration::seconds(60),
        }
    }
}

/// Hour names for the last `n` hours, newest first.
pub fn last_hours(n: u32) -> Vec<String> {
    let now = Utc::now();
    (0..n)
        .map(|i| hour_str(now - ChronoDuration::hours(i as i64)))
        .collect()
}

/// Segment names the peer has that we don't.
pub fn missing_segments(remote: Vec<String>, local: &HashSet<String>) -> Vec<String> {
    remote
        .into_iter()
        .filter(|name| !local.contains(name))
        .collect()
}

fn list_local_segments(
    base_dir: &Path,
    channel: &str,
    quality: &str,
    hour: &str,
) -> Result<HashSet<String>, BackfillError> {
    let path = base_dir.join(channel).join(quality).join(hour);
    let names = listdir(&path).map_err(|e| BackfillError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(names
        .into_iter()
        .filter(|name| !name.starts_with('.'))
        .collect())
}

/// Backfill every requested quality of `channel` from one peer.
///
/// Failure isolation: a failed segment doesn't abort its hour, a failed hour
/// doesn't abort the quality, and the caller isolates peers from each other.
pub async fn backfill_node(
    base_dir: &Path,
    peer: &PeerClient,
    channel: &str,
    qualities: &[String],
    options: &BackfillNodeOptions,
) -> Result<(), BackfillError> {
    info!(peer = %peer.base_url(), channel, "starting backfill");

    let mut hours: Vec<String> = match &options.hours {
        HourSelection::LastHours(n) => last_hours(*n),
        HourSelection::Explicit(hours) => hours.clone(),
        HourSelection::All | HourSelection::Range { .. } => {
            // hour names across qualities can differ; take the union
            let mut union = HashSet::new();
            for quality in qualities {
                union.extend(peer.list_hours(channel, quality).await?);
            }
            let mut hours: Vec<String> = union.into_iter().collect();
            if let HourSelection::Range { start, stop } = &options.hours {
                hours.retain(|hour| hour >= start && hour <= stop);
            }
            hours
        }
    };
    if let Some(order) = options.hour_order {
        order.apply(&mut hours);
    }

    for quality in qualities {
        for hour in &hours {
            if let Err(e) = backfill_hour(base_dir, peer, channel, quality, hour, options).await {
                warn!(
                    peer = %peer.base_url(),
                    quality,
                    hour,
                    error = %e,
                    "failed to backfill hour",
                );
            }
        }
    }

    info!(peer = %peer.base_url(), channel, "finished backfill");
    Ok(())
}

async fn backfill_hour(
    base_dir: &Path,
    peer: &PeerClient,
    channel: &str,
    quality: &str,
    hour: &str,
    options: &BackfillNodeOptions,
) -> Result<(), BackfillError> {
    let local = list_local_segments(base_dir, channel, quality, hour)?;
    let remote = peer.list_segments(channel, quality, hour).await?;
    let mut missing = missing_segments(remote, &local);
    options.segment_order.apply(&mut missing);

    for name in missing {
        let relative = format!("{channel}/{quality}/{hour}/{name}");
        let segment = match parse_segment_path(&relative) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(name, error = %e, "remote listed an invalid segment name");
                continue;
            }
        };
        if segment.kind == SegmentKind::Temp {
            continue;
        }
        // leave very fresh segments to the downloader
        if let Some(start) = segment.start
            && Utc::now() - start < options.recent_cutoff
        {
            debug!(name, "skipping recent segment");
            continue;
        }

        let dest = base_dir.join(&relative);
        if let Err(e) = peer
            .fetch_segment(channel, quality, hour, &name, &dest)
            .await
        {
            warn!(name, error = %e, "failed to fetch segment");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_hours_are_consecutive_and_newest_first() {
        let hours = last_hours(3);
        assert_eq!(hours.len(), 3);
        let mut sorted = hours.clone();
        sorted.sort();
        sorted.reverse();
        assert_eq!(hours, sorted);
    }

    #[test]
    fn missing_is_remote_minus_local() {
        let local: HashSet<String> = ["a.ts", "b.ts"].iter().map(|s| s.to_string()).collect();
        let remote = vec!["a.ts".to_string(), "c.ts".to_string()];
        assert_eq!(missing_segments(remote, &local), vec!["c.ts".to_string()]);
    }

    #[test]
    fn order_forward_and_reverse() {
        let mut names = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        Order::Forward.apply(&mut names);
        assert_eq!(names, vec!["a", "b", "c"]);
        Order::Reverse.apply(&mut names);
        assert_eq!(names, vec!["c", "b", "a"]);
    }
}
