//! Raw PCM test file generation
//!
//! Clip files are headerless little-endian signed 16-bit PCM, the layout the
//! renderer and cache worker read. Content is deterministic so tests can
//! compare rendered bytes against the source.

use cutline_audio::audio::PcmFormat;
use cutline_audio::render::{ClipAudio, ClipTable};
use cutline_common::config::LoggingConfig;
use cutline_common::logging::init_tracing;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write interleaved samples to `path`
pub fn write_pcm16<P: AsRef<Path>>(path: P, samples: &[i16]) -> std::io::Result<()> {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    std::fs::write(path, bytes)
}

/// Interleaved stereo sine, same signal on both channels
///
/// # Arguments
/// * `rate` - Sample rate in Hz
/// * `freq` - Tone frequency in Hz
/// * `amplitude` - Peak level, 1.0 = full scale
/// * `frames` - Frames to generate
pub fn sine_stereo(rate: u32, freq: f32, amplitude: f32, frames: usize) -> Vec<i16> {
    (0..frames)
        .flat_map(|i| {
            let t = i as f32 / rate as f32;
            let s = ((2.0 * PI * freq * t).sin() * amplitude * 32767.0).round() as i16;
            [s, s]
        })
        .collect()
}

/// Mono ramp wrapping every `period` frames
pub fn ramp_mono(frames: usize, period: usize) -> Vec<i16> {
    (0..frames)
        .map(|i| ((i % period) as i32 * 64 - 16384) as i16)
        .collect()
}

/// Generated clips in a temporary directory plus the catalog describing them
pub struct ClipFixture {
    pub dir: TempDir,
    pub catalog: ClipTable,
}

impl ClipFixture {
    pub fn new() -> Self {
        // Honours RUST_LOG; only the first fixture of a test binary installs it
        init_tracing(&LoggingConfig::default());
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            catalog: ClipTable::new(),
        }
    }

    /// Write `samples` as the audio of `clip`
    pub fn add(&mut self, clip: i32, format: PcmFormat, samples: &[i16]) -> PathBuf {
        let path = self.dir.path().join(format!("clip{}.pcm", clip));
        write_pcm16(&path, samples).expect("write clip audio");
        self.catalog.insert(clip, ClipAudio::new(&path, format));
        path
    }

    /// Register `clip` against an existing file
    pub fn alias(&mut self, clip: i32, format: PcmFormat, path: &Path) {
        self.catalog.insert(clip, ClipAudio::new(path, format));
    }

    /// Register `clip` against a file that does not exist
    pub fn missing(&mut self, clip: i32, format: PcmFormat) -> PathBuf {
        let path = self.dir.path().join(format!("missing{}.pcm", clip));
        self.catalog.insert(clip, ClipAudio::new(&path, format));
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for ClipFixture {
    fn default() -> Self {
        Self::new()
    }
}
