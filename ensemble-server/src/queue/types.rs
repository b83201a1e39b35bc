//! Queue entity types
//!
//! `PlayerQueue` is the per-player queue state machine; `QueueItem` is one
//! entry in its item store. Both serialize to JSON for the state store so a
//! queue survives a server restart.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use ensemble_common::{MediaItem, MediaType, PcmFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playback state as reported by (or derived for) the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Idle,
    Playing,
    Paused,
}

/// Repeat behavior at the end of a track / the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Off,
    One,
    All,
}

/// Splice semantics for `play_media`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOption {
    /// Clear the queue and play the new items
    Replace,
    /// Insert after the current item, dropping the old remainder
    ReplaceNext,
    /// Insert after the current item, keeping the old remainder
    Next,
    /// Insert after the current item and start playing the insert point
    Play,
    /// Append to the end of the queue
    Add,
}

/// Optimistic track-transition marker
///
/// Set to `Transitioning` before a play request is dispatched to the
/// renderer and cleared shortly after, so the reconciler ignores stale
/// renderer reports in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionState {
    #[default]
    Stable,
    Transitioning,
}

/// Volume normalization strategy resolved per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeNormalizationMode {
    Disabled,
    /// Loudness-normalize on the fly while measuring
    Dynamic,
    /// User-configured fixed gain correction
    FixedGain,
    /// Gain correction from a stored loudness measurement
    MeasurementOnly,
}

/// Everything the transcoding collaborator resolved for one queue item
///
/// Attached lazily by the load step; `duration` and `seconds_streamed` are
/// corrected by the flow assembler to reflect the PCM that was actually
/// emitted (crossfade and silence stripping shorten tracks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDetails {
    /// Resolved stream location (opaque to the queue engine)
    pub uri: String,
    pub audio_format: PcmFormat,
    pub codec_type: String,
    /// ICY-style now-playing title for radio streams
    pub stream_title: Option<String>,
    /// Seek offset in seconds applied at the head of the stream
    pub seek_position: u64,
    pub fade_in: bool,
    pub volume_normalization_mode: VolumeNormalizationMode,
    pub volume_normalization_gain: Option<f64>,
    /// Strip leading silence (skipped for the very first track of a session)
    pub strip_silence_begin: bool,
    pub strip_silence_end: bool,
    /// Corrected duration in seconds once known
    pub duration: Option<f64>,
    /// Actual PCM seconds emitted for this item
    pub seconds_streamed: Option<f64>,
    /// Set when the stream failed mid-item; the session moves on
    pub stream_error: bool,
    /// Fingerprint of the DSP/output chain the details were resolved for
    pub dsp_fingerprint: Option<String>,
}

impl StreamDetails {
    /// Bare details for a known uri, defaults everywhere else
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            audio_format: PcmFormat::default(),
            codec_type: "pcm".to_string(),
            stream_title: None,
            seek_position: 0,
            fade_in: false,
            volume_normalization_mode: VolumeNormalizationMode::Disabled,
            volume_normalization_gain: None,
            strip_silence_begin: false,
            strip_silence_end: false,
            duration: None,
            seconds_streamed: None,
            stream_error: false,
            dsp_fingerprint: None,
        }
    }
}

/// One entry in a queue's item store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique within the queue
    pub queue_item_id: Uuid,
    pub queue_id: Uuid,
    /// Stable original-order key, incremented on every splice; sorting on it
    /// restores the pre-shuffle relative order
    pub sort_index: u64,
    pub name: String,
    /// Underlying resolved media item (None for transient entries)
    pub media_item: Option<MediaItem>,
    /// Nominal duration in seconds, when known
    pub duration: Option<u64>,
    /// Attached by the load step, absent until then
    pub streamdetails: Option<StreamDetails>,
}

impl QueueItem {
    /// Create a queue item wrapping a resolved media item
    pub fn from_media_item(queue_id: Uuid, media_item: MediaItem) -> Self {
        Self {
            queue_item_id: Uuid::new_v4(),
            queue_id,
            sort_index: 0,
            name: media_item.name.clone(),
            duration: media_item.duration,
            media_item: Some(media_item),
            streamdetails: None,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_item
            .as_ref()
            .map(|m| m.media_type)
            .unwrap_or(MediaType::Track)
    }

    /// False when the catalog marked the underlying media unavailable
    pub fn available(&self) -> bool {
        self.media_item.as_ref().map(|m| m.available).unwrap_or(true)
    }

    pub fn uri(&self) -> Option<&str> {
        self.media_item.as_ref().map(|m| m.uri.as_str())
    }
}

/// Append-only record of PCM seconds emitted per item during a flow session
///
/// Consumed by the reconciler (while flow mode is active) to reconstruct
/// which item is "now playing" from the renderer's total elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayLogEntry {
    pub queue_item_id: Uuid,
    /// Actual PCM seconds emitted; may be 0.0 after a stream error
    pub seconds_streamed: Option<f64>,
    /// Corrected duration once known
    pub duration: Option<f64>,
}

impl PlayLogEntry {
    pub fn new(queue_item_id: Uuid) -> Self {
        Self {
            queue_item_id,
            seconds_streamed: None,
            duration: None,
        }
    }
}

/// Maximum number of recently enqueued collection items kept as radio seeds
pub const ENQUEUED_MEDIA_ITEMS_CAP: usize = 10;

/// Per-player playback queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerQueue {
    pub queue_id: Uuid,
    pub display_name: String,
    pub available: bool,
    /// Whether this queue is the player's current source
    pub active: bool,
    pub state: PlayState,
    /// Index of the current item, None when nothing was ever played
    pub current_index: Option<usize>,
    /// Furthest index the renderer has started receiving; items at or before
    /// it are committed and may no longer be moved or deleted
    pub index_in_buffer: Option<usize>,
    pub item_count: usize,
    pub shuffle_enabled: bool,
    pub repeat_mode: RepeatMode,
    pub dont_stop_the_music_enabled: bool,
    /// Seed media items for dynamic radio fill
    pub radio_source: Vec<MediaItem>,
    /// Bounded FIFO of recently requested collection-level items, used as
    /// radio seeds when don't-stop-the-music kicks in
    pub enqueued_media_items: VecDeque<MediaItem>,
    /// Elapsed seconds within the current item
    pub elapsed_time: u64,
    pub elapsed_time_last_updated: DateTime<Utc>,
    /// Position to resume from after a stop/pause
    pub resume_pos: u64,
    pub flow_mode: bool,
    pub flow_mode_stream_log: Vec<PlayLogEntry>,
    pub current_item: Option<QueueItem>,
    pub next_item: Option<QueueItem>,
    #[serde(skip)]
    pub transition: TransitionState,
}

impl PlayerQueue {
    pub fn new(queue_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            queue_id,
            display_name: display_name.into(),
            available: true,
            active: false,
            state: PlayState::Idle,
            current_index: None,
            index_in_buffer: None,
            item_count: 0,
            shuffle_enabled: false,
            repeat_mode: RepeatMode::Off,
            dont_stop_the_music_enabled: false,
            radio_source: Vec::new(),
            enqueued_media_items: VecDeque::new(),
            elapsed_time: 0,
            elapsed_time_last_updated: Utc::now(),
            resume_pos: 0,
            flow_mode: false,
            flow_mode_stream_log: Vec::new(),
            current_item: None,
            next_item: None,
            transition: TransitionState::Stable,
        }
    }

    /// Elapsed time extrapolated to now while playing
    ///
    /// The renderer reports elapsed time only periodically; between reports
    /// the wall clock fills the gap.
    pub fn corrected_elapsed_time(&self) -> u64 {
        if self.state == PlayState::Playing {
            let drift = (Utc::now() - self.elapsed_time_last_updated)
                .num_seconds()
                .max(0) as u64;
            self.elapsed_time + drift
        } else {
            self.elapsed_time
        }
    }

    /// Remember a collection-level item as a future radio seed (FIFO, cap 10)
    pub fn remember_enqueued_media_item(&mut self, item: MediaItem) {
        self.enqueued_media_items.push_back(item);
        while self.enqueued_media_items.len() > ENQUEUED_MEDIA_ITEMS_CAP {
            self.enqueued_media_items.pop_front();
        }
    }
}
