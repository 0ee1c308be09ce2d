//! Multi-track segment rendering
//!
//! Streams the audio of N tracks over a time span through the sample
//! converter, an optional effects host and the clip limiter into a PCM file
//! or an in-memory [`AudioBuffer`](crate::audio::AudioBuffer).

pub mod catalog;
pub mod effects;
pub mod pcm_file;
pub mod segment;

pub use catalog::{ClipAudio, ClipCatalog, ClipTable};
pub use effects::{BlockInfo, EffectsHost, Handoff};
pub use pcm_file::{PcmReader, PcmWriter, ReaderCache};
pub use segment::{Fade, RenderOutcome, RenderTarget, Segment, SegmentRenderer, TrackSpan};
