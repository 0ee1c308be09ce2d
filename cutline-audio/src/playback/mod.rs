//! Playback subsystem
//!
//! - `cache_worker`: background thread filling a double buffer for the
//!   realtime consumer
//! - `retry`: caller-supplied policy for failed file operations
//! - `engine`: [`AudioEngine`](engine::AudioEngine), the context owning the
//!   long-lived audio state

pub mod cache_worker;
pub mod engine;
pub mod retry;

pub use cache_worker::{CacheBuffer, CacheOutput, CacheRequest, CacheWorker, FillToken};
pub use retry::{with_retry, MaxAttempts, RetryOutcome, RetryPolicy};
