//! HLS client: playlist resolution and parsing per upstream provider.
//!
//! A [`Provider`] turns a stream identity into media playlist URLs, one per
//! quality, and fetches media playlists into dated segment entries. Two
//! providers are supported: a generic static-URL provider and the Twitch
//! token-handshake provider.

pub mod error;
pub mod playlist;
pub mod provider;
pub mod twitch;

pub use error::ProviderError;
pub use playlist::{MediaPlaylistFetch, PlaylistEntry, parse_media_playlist};
pub use provider::{PLAYLIST_TIMEOUT, Provider, ProviderSpec, UrlProvider};
pub use twitch::TwitchProvider;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;
