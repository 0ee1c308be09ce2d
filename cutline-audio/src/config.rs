//! Tuning configuration for the audio core
//!
//! Every value has a built-in default; a TOML file only needs the keys it
//! overrides. Sections:
//! - `[arena]` realtime buffer size
//! - `[render]` segment renderer memory ceiling, filter block size, open
//!   descriptor budget and default output format
//! - `[limiter]` clip limiter decay
//! - `[resample]` nearest-neighbour rounding bias
//! - `[cache]` cache worker fill size
//! - `[quantize]` frame interpolation, capture clip, audio micro-adjust
//!   thresholds and pre-analysis bounds
//! - `[logging]` default log filter
//!
//! The limiter decay, rounding bias and micro-adjust thresholds are tuned
//! empirically and exposed here rather than hard-coded.

use crate::audio::types::PcmFormat;
use crate::error::{Error, Result};
use cutline_common::config::{load_or_default, parse_toml, LoggingConfig};
use serde::Deserialize;
use std::path::Path;

/// Complete audio core configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub quantize: QuantizeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AudioConfig {
    /// Load from the resolved config file, falling back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config: AudioConfig = load_or_default(explicit)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AudioConfig = parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.arena.bytes < 4 {
            return Err(Error::Config(format!(
                "arena.bytes must hold at least one sample, got {}",
                self.arena.bytes
            )));
        }
        if self.render.block_size == 0 {
            return Err(Error::Config("render.block_size must be positive".to_string()));
        }
        if self.render.max_audio_mem < 4096 {
            return Err(Error::Config(format!(
                "render.max_audio_mem too small: {} bytes",
                self.render.max_audio_mem
            )));
        }
        if !(0.0..1.0).contains(&self.limiter.decay) {
            return Err(Error::Config(format!(
                "limiter.decay must be in [0, 1), got {}",
                self.limiter.decay
            )));
        }
        if !(0.0..1.0).contains(&self.resample.bias) {
            return Err(Error::Config(format!(
                "resample.bias must be in [0, 1), got {}",
                self.resample.bias
            )));
        }
        let q = &self.quantize;
        if q.max_velocity_change < 0.0 || q.max_seek_error < 0.0 {
            return Err(Error::Config(
                "quantize thresholds must not be negative".to_string(),
            ));
        }
        if q.rescale_min > 1.0 || q.rescale_max < 1.0 || q.rescale_min <= 0.0 {
            return Err(Error::Config(format!(
                "quantize rescale range must contain 1.0, got [{}, {}]",
                q.rescale_min, q.rescale_max
            )));
        }
        self.render.output.validate()?;
        Ok(())
    }
}

/// Realtime arena sizing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArenaConfig {
    /// Bytes per channel arena
    #[serde(default = "default_arena_bytes")]
    pub bytes: usize,
}

fn default_arena_bytes() -> usize {
    768_000
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            bytes: default_arena_bytes(),
        }
    }
}

/// Segment renderer limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderConfig {
    /// Ceiling for scratch buffers held during one render call
    #[serde(default = "default_max_audio_mem")]
    pub max_audio_mem: usize,

    /// Frames per filter sub-chunk
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Track readers kept open between render calls
    #[serde(default = "default_stored_fds")]
    pub stored_fds: usize,

    /// Format used when a caller does not specify one
    #[serde(default)]
    pub output: PcmFormat,
}

fn default_max_audio_mem() -> usize {
    32 * 1024 * 1024
}

fn default_block_size() -> usize {
    1024
}

fn default_stored_fds() -> usize {
    64
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_audio_mem: default_max_audio_mem(),
            block_size: default_block_size(),
            stored_fds: default_stored_fds(),
            output: PcmFormat::default(),
        }
    }
}

/// Adaptive clip limiter
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LimiterConfig {
    /// Per-frame decay of the ceiling back toward 1.0
    #[serde(default = "default_decay")]
    pub decay: f32,
}

fn default_decay() -> f32 {
    0.9995
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            decay: default_decay(),
        }
    }
}

/// Nearest-neighbour resampling
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResampleConfig {
    /// Rounding bias applied to the source position before truncation
    #[serde(default = "default_bias")]
    pub bias: f64,
}

fn default_bias() -> f64 {
    0.4999
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            bias: default_bias(),
        }
    }
}

/// Background cache worker
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheConfig {
    /// Output frames per fill
    #[serde(default = "default_cache_frames")]
    pub frames: usize,
}

fn default_cache_frames() -> usize {
    393_216
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            frames: default_cache_frames(),
        }
    }
}

/// Event-list quantizer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuantizeConfig {
    /// Interpolate frame numbers for free-running lists
    #[serde(default = "default_true")]
    pub interpolate: bool,

    /// Clip holding live-captured frames, never interpolated
    #[serde(default)]
    pub scrap_clip: Option<i32>,

    /// Largest relative velocity change allowed by audio micro-adjustment
    #[serde(default = "default_max_velocity_change")]
    pub max_velocity_change: f64,

    /// Largest seek correction (seconds) applied by audio micro-adjustment
    #[serde(default = "default_max_seek_error")]
    pub max_seek_error: f64,

    /// Run frame smoothing and rescaling before quantizing
    #[serde(default)]
    pub pre_analysis: bool,

    /// Largest frame-number spread of a run eligible for smoothing
    #[serde(default = "default_smooth_max_frames")]
    pub smooth_max_frames: i64,

    /// Largest time span (seconds) of a run eligible for smoothing
    #[serde(default = "default_smooth_max_span")]
    pub smooth_max_span: f64,

    /// Lower bound of the per-segment rescale factor
    #[serde(default = "default_rescale_min")]
    pub rescale_min: f64,

    /// Upper bound of the per-segment rescale factor
    #[serde(default = "default_rescale_max")]
    pub rescale_max: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_velocity_change() -> f64 {
    0.1
}

fn default_max_seek_error() -> f64 {
    0.05
}

fn default_smooth_max_frames() -> i64 {
    4
}

fn default_smooth_max_span() -> f64 {
    0.25
}

fn default_rescale_min() -> f64 {
    0.9
}

fn default_rescale_max() -> f64 {
    1.1
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            interpolate: default_true(),
            scrap_clip: None,
            max_velocity_change: default_max_velocity_change(),
            max_seek_error: default_max_seek_error(),
            pre_analysis: false,
            smooth_max_frames: default_smooth_max_frames(),
            smooth_max_span: default_smooth_max_span(),
            rescale_min: default_rescale_min(),
            rescale_max: default_rescale_max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = AudioConfig::from_toml_str("").unwrap();
        assert_eq!(config, AudioConfig::default());
        assert_eq!(config.render.max_audio_mem, 32 * 1024 * 1024);
        assert_eq!(config.render.block_size, 1024);
        assert_eq!(config.render.stored_fds, 64);
        assert_eq!(config.arena.bytes, 768_000);
        assert_eq!(config.resample.bias, 0.4999);
    }

    #[test]
    fn test_partial_override() {
        let config = AudioConfig::from_toml_str(
            r#"
            [render]
            block_size = 256

            [quantize]
            scrap_clip = 3
            max_seek_error = 0.02

            [render.output]
            sample_rate = 48000
            channels = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.render.block_size, 256);
        assert_eq!(config.render.max_audio_mem, 32 * 1024 * 1024);
        assert_eq!(config.quantize.scrap_clip, Some(3));
        assert_eq!(config.quantize.max_seek_error, 0.02);
        assert!(config.quantize.interpolate);
        assert_eq!(config.render.output.sample_rate, 48000);
        assert_eq!(config.render.output.channels, 1);
        assert_eq!(config.render.output.bits, 16);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(AudioConfig::from_toml_str("[limiter]\ndecay = 1.5").is_err());
        assert!(AudioConfig::from_toml_str("[render]\nblock_size = 0").is_err());
        assert!(AudioConfig::from_toml_str("[quantize]\nrescale_min = 1.2").is_err());
        assert!(AudioConfig::from_toml_str("[render.output]\nbits = 12").is_err());
    }
}
