//! # cutline Audio Core
//!
//! Real-time audio pipeline of the editor:
//! - Arena buffers for realtime producer/consumer handoff
//! - Sample format conversion, nearest-neighbour resampling and the
//!   adaptive clip limiter
//! - Multi-track segment rendering with bounded memory
//! - Double-buffered background cache worker
//! - Event-list time quantization onto a fixed frame grid
//!
//! [`AudioEngine`] owns the long-lived state and is the entry point for
//! callers.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod render;
pub mod timeline;

pub use config::AudioConfig;
pub use error::{Error, IoFailure, IoOperation, Result};
pub use playback::engine::AudioEngine;
