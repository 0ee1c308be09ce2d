//! Tick-based timing for event lists and audio spans
//!
//! Every timecode in an event list is expressed in ticks of 10 ns. Audio
//! positions are expressed either as seconds (track seek positions) or as
//! sample frames at a given rate; this module holds the conversions between
//! the three, plus quantisation onto a fixed frame grid.
//!
//! # Representations
//!
//! 1. **Ticks**: `i64` at 100,000,000 per second - event timecodes
//! 2. **Seconds**: `f64` - track seek positions and velocities
//! 3. **Frames**: `usize` sample frames at an audio rate
//!
//! # Examples
//!
//! ```rust
//! use cutline_common::timing::*;
//!
//! let ticks = seconds_to_ticks(1.5);
//! assert_eq!(ticks, 150_000_000);
//!
//! // 1.5 s at 44.1 kHz
//! assert_eq!(ticks_to_samples(ticks, 44100), 66_150);
//!
//! // 25 fps grid: every frame is 4,000,000 ticks apart
//! assert_eq!(grid_tick(3, 25.0), 12_000_000);
//! assert_eq!(quantize_ticks(13_900_000, 25.0), 12_000_000);
//! ```

/// Timecode in ticks
pub type Ticks = i64;

/// Ticks per second (10 ns resolution)
pub const TICKS_PER_SECOND: Ticks = 100_000_000;

/// Ticks per second as a float, for fractional arithmetic
pub const TICKS_PER_SECOND_F64: f64 = TICKS_PER_SECOND as f64;

/// Convert ticks to seconds
pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND_F64
}

/// Convert seconds to ticks, rounding to the nearest tick
pub fn seconds_to_ticks(seconds: f64) -> Ticks {
    (seconds * TICKS_PER_SECOND_F64).round() as Ticks
}

/// Convert a tick span to a sample-frame count at `sample_rate`
///
/// Rounds to the nearest frame (`ticks / TPS * rate + 0.5`, truncated).
/// Negative spans yield 0.
pub fn ticks_to_samples(ticks: Ticks, sample_rate: u32) -> usize {
    let samples = ticks_to_seconds(ticks) * sample_rate as f64 + 0.5;
    if samples <= 0.0 {
        0
    } else {
        samples as usize
    }
}

/// Sample frames between two absolute timecodes
///
/// Both ends are rounded to the sample grid on their own, so consecutive
/// spans add up to the frames of the whole range.
pub fn span_samples(start: Ticks, end: Ticks, sample_rate: u32) -> usize {
    ticks_to_samples(end, sample_rate).saturating_sub(ticks_to_samples(start, sample_rate))
}

/// Convert a sample-frame count at `sample_rate` to ticks
pub fn samples_to_ticks(samples: usize, sample_rate: u32) -> Ticks {
    if sample_rate == 0 {
        return 0;
    }
    seconds_to_ticks(samples as f64 / sample_rate as f64)
}

/// Timecode of output frame `index` on a `fps` grid
///
/// Computed from the frame index rather than by repeated addition so that
/// non-integral tick periods (e.g. 30 fps) never drift.
pub fn grid_tick(index: i64, fps: f64) -> Ticks {
    (index as f64 / fps * TICKS_PER_SECOND_F64).round() as Ticks
}

/// Index of the grid frame nearest to `ticks` on a `fps` grid
pub fn grid_index(ticks: Ticks, fps: f64) -> i64 {
    (ticks_to_seconds(ticks) * fps + 0.5).floor() as i64
}

/// Snap a timecode to the nearest grid frame boundary
pub fn quantize_ticks(ticks: Ticks, fps: f64) -> Ticks {
    grid_tick(grid_index(ticks, fps), fps)
}

/// Length of one frame at `fps`, rounded to whole ticks
pub fn ticks_per_frame(fps: f64) -> Ticks {
    (TICKS_PER_SECOND_F64 / fps).round() as Ticks
}

/// Floor a byte count to a whole number of frames of `frame_bytes` each
pub fn align_to_frame(bytes: u64, frame_bytes: usize) -> u64 {
    if frame_bytes == 0 {
        return 0;
    }
    bytes - bytes % frame_bytes as u64
}
