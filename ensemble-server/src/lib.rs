//! Ensemble orchestration server library
//!
//! Houses the queue-driven flow streaming engine: per-player playback queues,
//! the command surface that mutates them, the reconciler that keeps them in
//! sync with renderer-reported state, and the flow stream assembler that
//! renders a whole queue as one continuous PCM stream.

pub mod api;
pub mod config;
pub mod db;
pub mod providers;
pub mod queue;
pub mod stream;
pub mod tasks;

pub use ensemble_common::{Error, Result};
