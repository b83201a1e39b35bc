//! Playback queue engine

pub mod controller;
pub mod index;
pub mod radio;
pub mod reconciler;
pub mod store;
pub mod types;

pub use controller::QueueController;
pub use store::ItemStore;
pub use types::{
    PlayLogEntry, PlayState, PlayerQueue, QueueItem, QueueOption, RepeatMode, StreamDetails,
    TransitionState, VolumeNormalizationMode,
};
