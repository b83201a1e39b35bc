//! # Ensemble Common Library
//!
//! Shared code for the Ensemble multi-room audio orchestration server:
//! - Media item model (tracks, albums, playlists, podcasts, ...)
//! - PCM audio format descriptions
//! - Event types (EnsembleEvent enum) and EventBus
//! - Error taxonomy shared by all components

pub mod error;
pub mod events;
pub mod format;
pub mod media;

pub use error::{Error, Result};
pub use format::PcmFormat;
pub use media::{MediaItem, MediaType};
