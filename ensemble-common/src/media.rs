//! Media item model
//!
//! A `MediaItem` is the catalog's view of something playable or expandable:
//! a single track, a radio station, or a collection (album, playlist, artist,
//! podcast, audiobook) that the queue controller expands into tracks or
//! episodes before enqueueing.

use serde::{Deserialize, Serialize};

/// Kind of media a `MediaItem` refers to
///
/// Collection types (album, artist, playlist, podcast, audiobook) are
/// expanded into playable items at enqueue time; the rest are playable
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Track,
    Album,
    Artist,
    Playlist,
    Radio,
    Audiobook,
    Podcast,
    PodcastEpisode,
}

impl MediaType {
    /// Collection-level types that can seed dynamic radio mode
    pub fn is_radio_seed(&self) -> bool {
        matches!(
            self,
            MediaType::Track | MediaType::Album | MediaType::Playlist | MediaType::Artist
        )
    }

    /// Types that resolve to exactly themselves (no expansion step)
    pub fn is_playable(&self) -> bool {
        matches!(
            self,
            MediaType::Track | MediaType::Radio | MediaType::PodcastEpisode | MediaType::Audiobook
        )
    }
}

/// A resolved media item as returned by the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable uri, e.g. `library://track/123`
    pub uri: String,
    /// Provider-scoped item id
    pub item_id: String,
    /// Owning provider instance
    pub provider: String,
    /// Display name
    pub name: String,
    pub media_type: MediaType,
    /// False when the provider knows the item can no longer be streamed
    pub available: bool,
    /// Duration in seconds, when known
    pub duration: Option<u64>,
    /// Album identity, used to prefer album loudness across a gapless run
    pub album_id: Option<String>,
    /// Persisted resume point in milliseconds (audiobooks, podcast episodes)
    pub resume_position_ms: Option<u64>,
    /// Whether the item was already fully played (podcast episodes)
    pub fully_played: bool,
}

impl MediaItem {
    /// Minimal constructor for a playable track
    pub fn track(uri: impl Into<String>, name: impl Into<String>, duration: u64) -> Self {
        let uri = uri.into();
        Self {
            item_id: uri.clone(),
            uri,
            provider: "library".to_string(),
            name: name.into(),
            media_type: MediaType::Track,
            available: true,
            duration: Some(duration),
            album_id: None,
            resume_position_ms: None,
            fully_played: false,
        }
    }
}

impl PartialEq for MediaItem {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for MediaItem {}

impl std::hash::Hash for MediaItem {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}
