//! Core audio data types
//!
//! Describes the raw PCM layout of clip audio files and render outputs:
//! interleaved samples of 8, 16 or 32 bits, signed or unsigned, in either
//! byte order. All byte offsets derived from a format are whole frames.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Byte order of multi-byte samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running machine
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// Raw PCM format
///
/// **Defaults:** 44100 Hz, stereo, 16-bit, little-endian. `signed` left unset
/// means unsigned for 8-bit and signed for wider samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PcmFormat {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Bits per sample: 8, 16 or 32
    #[serde(default = "default_bits")]
    pub bits: u16,

    #[serde(default)]
    pub signed: Option<bool>,

    #[serde(default = "default_endian")]
    pub endian: Endian,
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> usize {
    2
}

fn default_bits() -> u16 {
    16
}

fn default_endian() -> Endian {
    Endian::Little
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(default_sample_rate(), default_channels(), default_bits())
    }
}

impl PcmFormat {
    /// Little-endian format with the default signedness for `bits`
    pub fn new(sample_rate: u32, channels: usize, bits: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits,
            signed: None,
            endian: Endian::Little,
        }
    }

    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = Some(signed);
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.bits, 8 | 16 | 32) {
            return Err(Error::Format(format!(
                "unsupported sample width: {} bits",
                self.bits
            )));
        }
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(Error::Format(format!(
                "format needs channels and rate, got {} ch @ {} Hz",
                self.channels, self.sample_rate
            )));
        }
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signed.unwrap_or(self.bits != 8)
    }

    /// Bytes per sample
    pub fn sample_bytes(&self) -> usize {
        self.bits as usize / 8
    }

    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.sample_bytes() * self.channels
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.frame_bytes() as f64 * self.sample_rate as f64
    }

    /// Byte offset of the frame nearest to `seconds`
    ///
    /// Positions written back by [`offset_to_seconds`](Self::offset_to_seconds)
    /// map to the same frame even when the float product lands just below it.
    pub fn nearest_offset(&self, seconds: f64) -> u64 {
        let frames = (seconds * self.sample_rate as f64).round().max(0.0) as u64;
        frames * self.frame_bytes() as u64
    }

    pub fn offset_to_seconds(&self, offset: u64) -> f64 {
        if self.frame_bytes() == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        (offset / self.frame_bytes() as u64) as f64 / self.sample_rate as f64
    }

    /// Encoding of a zero-amplitude sample
    pub fn silence_sample(&self) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        if !self.is_signed() && self.sample_bytes() > 0 {
            // Midpoint of the unsigned range: only the top bit is set
            let msb = match self.endian {
                Endian::Little => self.sample_bytes() - 1,
                Endian::Big => 0,
            };
            bytes[msb] = 0x80;
        }
        bytes
    }

    /// Fill `buf` with silence, sample by sample
    pub fn fill_silence(&self, buf: &mut [u8]) {
        let sample = self.silence_sample();
        let width = self.sample_bytes().max(1);
        if sample[..width].iter().all(|&b| b == 0) {
            buf.fill(0);
            return;
        }
        for chunk in buf.chunks_mut(width) {
            let n = chunk.len();
            chunk.copy_from_slice(&sample[..n]);
        }
    }
}
