//! Node-to-node replication: download segments from other nodes to catch
//! whatever this node missed.

pub mod backfill;
pub mod client;
pub mod error;
pub mod service;

pub use backfill::{BackfillNodeOptions, HourSelection, Order, backfill_node};
pub use client::PeerClient;
pub use error::BackfillError;
pub use service::{BackfillConfig, BackfillService};

/// Result type for backfill operations
pub type Result<T> = std::result::Result<T, BackfillError>;
