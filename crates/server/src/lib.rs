//! HTTP surface of one archive node.
//!
//! Serves the listing interface peers backfill from, raw segment bytes,
//! generated HLS playlists over the archive, and on-demand cut streams.

pub mod error;
pub mod playlist;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use playlist::{generate_master, generate_media};
pub use routes::{AppState, router};

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind and serve until the token is cancelled.
pub async fn run_server(
    listen: &str,
    state: AppState,
    token: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}
