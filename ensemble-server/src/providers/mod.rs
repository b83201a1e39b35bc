//! Collaborator interfaces
//!
//! The queue engine treats the media catalog, the transcoding pipeline and
//! the per-protocol player drivers as external collaborators behind these
//! traits. Everything is object-safe so the controller can hold
//! `Arc<dyn ...>` trait objects wired at startup.

pub mod fs;

use async_trait::async_trait;
use ensemble_common::{MediaItem, PcmFormat, Result};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::types::{PlayState, QueueItem, StreamDetails};

/// Raw PCM chunk stream for one item
pub type PcmStream = BoxStream<'static, Result<Vec<u8>>>;

/// Media catalog / library controller
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Parse a uri into a resolved media item
    async fn resolve_uri(&self, uri: &str) -> Result<MediaItem>;

    /// Expand a collection (album/playlist/artist/podcast) into playable
    /// tracks or episodes, honoring an optional start-item cursor
    async fn collection_tracks(
        &self,
        collection: &MediaItem,
        start_item: Option<&str>,
    ) -> Result<Vec<MediaItem>>;

    /// Similar tracks for radio mode. `allow_lookup` permits (slower) remote
    /// provider lookups; the radio filler first tries without.
    async fn similar_tracks(&self, track: &MediaItem, allow_lookup: bool)
        -> Result<Vec<MediaItem>>;

    /// Base tracks derived from a radio seed item.
    /// Fails with `UnsupportedFeature` when the owning provider cannot.
    async fn radio_base_tracks(&self, seed: &MediaItem) -> Result<Vec<MediaItem>>;

    /// Persisted resume point: `(fully_played, position_ms)`
    async fn resume_position(&self, item: &MediaItem) -> Result<(bool, u64)>;

    /// Report playback progress back to the catalog
    async fn mark_item_played(
        &self,
        item: &MediaItem,
        fully_played: bool,
        seconds_played: u64,
    ) -> Result<()>;
}

/// Transcoding collaborator: resolves stream details and opens PCM streams
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolve stream details for a queue item.
    /// Fails with `MediaNotFound` for unplayable items.
    async fn resolve(
        &self,
        queue_item: &QueueItem,
        seek_position: u64,
        fade_in: bool,
        prefer_album_loudness: bool,
    ) -> Result<StreamDetails>;

    /// Open the raw PCM stream for previously resolved details.
    /// Dropping the returned stream must close the upstream source.
    async fn open(&self, details: &StreamDetails, pcm_format: PcmFormat) -> Result<PcmStream>;
}

/// What a player driver receives when asked to play or enqueue something
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerMedia {
    /// Stream url for the renderer to fetch
    pub uri: String,
    pub title: String,
    pub duration: Option<u64>,
    pub queue_id: Uuid,
    pub queue_item_id: Option<Uuid>,
    /// One continuous stream for the whole queue instead of per-track urls
    pub flow_mode: bool,
}

/// Player transport, dispatched to the per-protocol driver by the players
/// controller
#[async_trait]
pub trait PlayerTransport: Send + Sync {
    async fn play_media(&self, player_id: Uuid, media: PlayerMedia) -> Result<()>;

    /// Pre-announce the next item for gapless handoff (non-flow mode)
    async fn enqueue_next(&self, player_id: Uuid, media: PlayerMedia) -> Result<()>;

    async fn cmd_stop(&self, player_id: Uuid) -> Result<()>;
    async fn cmd_play(&self, player_id: Uuid) -> Result<()>;
    async fn cmd_pause(&self, player_id: Uuid) -> Result<()>;
}

/// Reference to whatever media a renderer says it is playing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerMediaRef {
    pub queue_id: Option<Uuid>,
    pub queue_item_id: Option<Uuid>,
    pub uri: Option<String>,
}

/// Periodic renderer-reported state snapshot (~1 Hz while playing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: Uuid,
    pub state: PlayState,
    /// Total elapsed seconds as reported (already drift-corrected by the
    /// driver); in flow mode this spans the whole stream session
    pub elapsed_time: u64,
    /// Source the player is currently rendering, if any
    pub active_source: Option<Uuid>,
    pub current_media: Option<PlayerMediaRef>,
    /// Output format fingerprints of the player and its group children
    pub output_formats: Vec<String>,
}
