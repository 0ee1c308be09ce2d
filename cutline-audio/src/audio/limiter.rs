//! Adaptive clip limiter for float to integer output
//!
//! Instead of hard-clipping, output is divided by a ceiling that starts at
//! 1.0. A sample louder than the ceiling raises the ceiling to its magnitude
//! and every sample already emitted in the batch is rewritten at the new
//! gain. While the ceiling is above 1.0 it decays back each frame:
//!
//! ```text
//! ceiling = ceiling * decay + (1 - decay)
//! ```
//!
//! The limiter state persists across batches so gain recovers smoothly over
//! consecutive render blocks.

use super::format::{encode_f32, SourceCursor, DEFAULT_RESAMPLE_BIAS};
use super::types::PcmFormat;
use crate::config::LimiterConfig;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct ClipLimiter {
    ceiling: f32,
    decay: f32,
    bias: f64,
    /// Pre-gain samples of the current batch, for rewriting on a raise
    emitted: Vec<f32>,
}

impl Default for ClipLimiter {
    fn default() -> Self {
        Self::new(&LimiterConfig::default())
    }
}

impl ClipLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            ceiling: 1.0,
            decay: config.decay,
            bias: DEFAULT_RESAMPLE_BIAS,
            emitted: Vec::new(),
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    /// Current ceiling (1.0 when no gain reduction is active)
    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    pub fn reset(&mut self) {
        self.ceiling = 1.0;
    }

    /// Bytes held by the rewrite scratch buffer
    pub fn scratch_bytes(&self) -> usize {
        self.emitted.capacity() * std::mem::size_of::<f32>()
    }

    /// Drop scratch space beyond `samples` held from earlier, larger batches
    pub fn shrink_scratch(&mut self, samples: usize) {
        self.emitted.clear();
        self.emitted.shrink_to(samples);
    }

    fn decay_step(&mut self) {
        if self.ceiling > 1.0 {
            self.ceiling = (self.ceiling * self.decay + (1.0 - self.decay)).max(1.0);
        }
    }

    /// Convert planar float to interleaved integer PCM
    ///
    /// Reads `src` (one slice per channel, cycled when `fmt.channels` is
    /// larger) at resample `scale`, multiplies by `volume`, divides by the
    /// ceiling and writes `fmt` samples to `dst`.
    ///
    /// # Returns
    /// Frames written to `dst`; 0 when there is no source channel.
    pub fn move_float_int(
        &mut self,
        dst: &mut [u8],
        src: &[&[f32]],
        frames: usize,
        scale: f64,
        fmt: &PcmFormat,
        volume: f32,
    ) -> usize {
        let channels = fmt.channels;
        let sample_bytes = fmt.sample_bytes();
        let frame_bytes = fmt.frame_bytes();
        if src.is_empty() || frame_bytes == 0 {
            return 0;
        }

        let src_frames = src.iter().map(|c| c.len()).min().unwrap_or(0);
        if src_frames == 0 {
            return 0;
        }
        let room = dst.len() / frame_bytes;
        if room < frames {
            debug!(
                "move_float_int: destination holds {} frames, {} requested",
                room, frames
            );
        }
        let out_frames = frames.min(room);

        self.emitted.clear();
        self.emitted.reserve_exact(out_frames * channels);

        let mut cursor = SourceCursor::new(scale, out_frames, src_frames, self.bias);
        for _ in 0..out_frames {
            self.decay_step();
            let idx = cursor.index();
            for ch in 0..channels {
                let v = src[ch % src.len()][idx] * volume;
                if v.abs() > self.ceiling {
                    trace!("Clip ceiling raised {} -> {}", self.ceiling, v.abs());
                    self.ceiling = v.abs();
                    // Roll back and re-emit the batch at the new gain
                    for (i, &prev) in self.emitted.iter().enumerate() {
                        let at = i * sample_bytes;
                        encode_f32(prev / self.ceiling, fmt, &mut dst[at..at + sample_bytes]);
                    }
                }
                let at = self.emitted.len() * sample_bytes;
                encode_f32(v / self.ceiling, fmt, &mut dst[at..at + sample_bytes]);
                self.emitted.push(v);
            }
            cursor.advance();
        }
        out_frames
    }
}
