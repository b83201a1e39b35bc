//! Audio stream assembly
//!
//! Turns queue items into the raw PCM byte streams the renderers fetch over
//! HTTP: either one stream per track, or a single continuous flow stream
//! covering the whole queue with sample-accurate crossfades at every track
//! boundary.

pub mod crossfade;
pub mod flow;

pub use crossfade::crossfade_pcm_parts;
pub use flow::{flow_stream, single_item_stream};
