//! Configuration management
//!
//! Two tiers, following the wider deployment convention:
//! 1. **TOML bootstrap**: database path, port, logging — static, read once
//!    at startup.
//! 2. **Queue settings**: runtime behavior of the queue engine, passed
//!    explicitly into the controller at construction. All timing constants
//!    the engine uses live here with their documented defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ensemble_common::{Error, MediaType, Result};
use serde::Deserialize;

use crate::queue::types::QueueOption;

/// Bootstrap configuration loaded from a TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite state database
    pub database_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Queue engine runtime settings
    #[serde(default)]
    pub queue: QueueSettings,
}

impl TomlConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    8927
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Runtime settings of the queue engine
///
/// The timing values are deliberate heuristics carried over from years of
/// renderer quirks; they are configurable but the defaults are the tested
/// ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Render queues as one continuous flow stream
    pub flow_mode_enabled: bool,

    /// Crossfade between consecutive tracks in flow mode
    pub crossfade_enabled: bool,

    /// Crossfade window in seconds
    pub crossfade_duration_secs: u32,

    /// Enqueue option used when `play_media` is called without one,
    /// keyed by media type
    pub default_enqueue_options: HashMap<MediaType, QueueOption>,

    /// Debounce window for rapid next/previous presses, seconds
    pub play_debounce_secs: f64,

    /// Minimal dispatch delay for non-debounced play requests, seconds
    pub play_dispatch_delay_secs: f64,

    /// How long after dispatch the transition flag stays set, seconds
    pub transition_settle_secs: f64,

    /// First and second attempt delays for enqueueing the next item on the
    /// renderer; some renderers need the media offered twice
    pub enqueue_retry_secs: (u64, u64),

    /// Delay before a scheduled radio refill runs, seconds
    pub radio_refill_delay_secs: u64,

    /// Grace period before an idle queue at its end is cleared, seconds
    pub end_of_queue_grace_secs: u64,
}

impl QueueSettings {
    /// Enqueue option for a media type when the caller did not pass one
    pub fn default_enqueue_option(&self, media_type: MediaType) -> QueueOption {
        self.default_enqueue_options
            .get(&media_type)
            .copied()
            .unwrap_or(QueueOption::Replace)
    }

    pub fn play_debounce(&self) -> Duration {
        Duration::from_secs_f64(self.play_debounce_secs)
    }

    pub fn play_dispatch_delay(&self) -> Duration {
        Duration::from_secs_f64(self.play_dispatch_delay_secs)
    }

    pub fn transition_settle(&self) -> Duration {
        Duration::from_secs_f64(self.transition_settle_secs)
    }

    pub fn radio_refill_delay(&self) -> Duration {
        Duration::from_secs(self.radio_refill_delay_secs)
    }

    pub fn end_of_queue_grace(&self) -> Duration {
        Duration::from_secs(self.end_of_queue_grace_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        let mut default_enqueue_options = HashMap::new();
        default_enqueue_options.insert(MediaType::Track, QueueOption::Play);
        default_enqueue_options.insert(MediaType::PodcastEpisode, QueueOption::Play);
        for media_type in [
            MediaType::Album,
            MediaType::Artist,
            MediaType::Playlist,
            MediaType::Radio,
            MediaType::Audiobook,
            MediaType::Podcast,
        ] {
            default_enqueue_options.insert(media_type, QueueOption::Replace);
        }
        Self {
            flow_mode_enabled: false,
            crossfade_enabled: false,
            crossfade_duration_secs: 10,
            default_enqueue_options,
            play_debounce_secs: 1.5,
            play_dispatch_delay_secs: 0.1,
            transition_settle_secs: 2.0,
            enqueue_retry_secs: (1, 10),
            radio_refill_delay_secs: 5,
            end_of_queue_grace_secs: 5,
        }
    }
}
