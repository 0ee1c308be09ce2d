//! Event-list timing
//!
//! - `track_state`: audio track state carried by frame events
//! - `quantizer`: re-times an event list onto a fixed frame grid
//! - `preanalysis`: optional smoothing and rescaling before quantizing

pub mod preanalysis;
pub mod quantizer;
pub mod track_state;

pub use quantizer::{FrameSource, QuantizeReport, Quantizer};
pub use track_state::{apply_frame_event, audio_state_at, AudioTrackState};
