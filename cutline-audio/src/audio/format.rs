//! Sample format conversion and nearest-neighbour resampling
//!
//! Every mover walks the output frames while a fractional source position
//! advances by `scale` per frame (negative scales walk the source backwards).
//! The source frame is the position rounded with a small bias toward the
//! direction of travel, clamped to the source edges. There is no
//! interpolation filter.
//!
//! Destination channels cycle through the source channels, so mono input is
//! duplicated into every output channel and surplus source channels are
//! dropped.
//!
//! Conversion routines never fail: empty sources and zero channel counts
//! produce no output, and frame-count mismatches are truncated with a debug
//! log.

use super::types::{Endian, PcmFormat};
use tracing::debug;

/// Full-scale divisor for positive 16-bit samples
pub const SAMPLE_MAX_16BIT_P: f64 = 32767.4999999;

/// Full-scale divisor for negative 16-bit samples
pub const SAMPLE_MAX_16BIT_N: f64 = 32768.0;

const SAMPLE_MAX_32BIT_P: f64 = 2147483647.4999999;
const SAMPLE_MAX_32BIT_N: f64 = 2147483648.0;

/// Default rounding bias for source positions
pub const DEFAULT_RESAMPLE_BIAS: f64 = 0.4999;

/// Source position accumulator for nearest-neighbour resampling
#[derive(Debug, Clone)]
pub struct SourceCursor {
    pos: f64,
    scale: f64,
    bias: f64,
    last: usize,
}

impl SourceCursor {
    /// Cursor producing `out_frames` indices into `src_frames` source frames
    ///
    /// Reverse cursors start on the last frame of the region the output
    /// covers, `out_frames * |scale| - 1`.
    pub fn new(scale: f64, out_frames: usize, src_frames: usize, bias: f64) -> Self {
        let pos = if scale < 0.0 {
            out_frames as f64 * -scale - 1.0
        } else {
            0.0
        };
        Self {
            pos,
            scale,
            bias,
            last: src_frames.saturating_sub(1),
        }
    }

    /// Current source frame, clamped to the source
    pub fn index(&self) -> usize {
        let idx = if self.scale < 0.0 {
            (self.pos - self.bias).ceil()
        } else {
            (self.pos + self.bias).floor()
        };
        idx.clamp(0.0, self.last as f64) as usize
    }

    pub fn advance(&mut self) {
        self.pos += self.scale;
    }
}

impl Iterator for SourceCursor {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.index();
        self.advance();
        Some(idx)
    }
}

/// Output layout and resample ratio for one conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remap {
    pub dst_channels: usize,
    /// Source frames consumed per output frame
    pub scale: f64,
    pub bias: f64,
}

impl Remap {
    pub fn new(dst_channels: usize, scale: f64) -> Self {
        Self {
            dst_channels,
            scale,
            bias: DEFAULT_RESAMPLE_BIAS,
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }
}

/// Drive `emit(out_frame, dst_channel, src_frame, src_channel)` over every
/// output sample; returns the number of output frames produced
fn remap_frames<F>(
    src_frames: usize,
    src_channels: usize,
    out_frames: usize,
    remap: &Remap,
    mut emit: F,
) -> usize
where
    F: FnMut(usize, usize, usize, usize),
{
    if src_frames == 0 || src_channels == 0 || remap.dst_channels == 0 {
        return 0;
    }
    let cursor = SourceCursor::new(remap.scale, out_frames, src_frames, remap.bias);
    for (out, src) in cursor.take(out_frames).enumerate() {
        for ch in 0..remap.dst_channels {
            emit(out, ch, src, ch % src_channels);
        }
    }
    out_frames
}

/// Clamp a requested frame count to what `dst_len` samples can hold
fn fit_frames(requested: usize, dst_len: usize, channels: usize, what: &str) -> usize {
    if channels == 0 {
        return 0;
    }
    let room = dst_len / channels;
    if room < requested {
        debug!(
            "{}: destination holds {} frames, {} requested; truncating",
            what, room, requested
        );
    }
    requested.min(room)
}

fn read_u16(bytes: &[u8], endian: Endian) -> u16 {
    let pair = [bytes[0], bytes[1]];
    match endian {
        Endian::Little => u16::from_le_bytes(pair),
        Endian::Big => u16::from_be_bytes(pair),
    }
}

fn read_u32(bytes: &[u8], endian: Endian) -> u32 {
    let quad = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match endian {
        Endian::Little => u32::from_le_bytes(quad),
        Endian::Big => u32::from_be_bytes(quad),
    }
}

/// Decode one sample of `fmt` to the 16-bit signed range
///
/// 8-bit samples are shifted up by 8 bits, 32-bit samples down by 16.
pub fn decode_s16(bytes: &[u8], fmt: &PcmFormat) -> i16 {
    match fmt.bits {
        8 => {
            let raw = if fmt.is_signed() { bytes[0] } else { bytes[0] ^ 0x80 };
            ((raw as i8) as i16) << 8
        }
        16 => {
            let raw = read_u16(bytes, fmt.endian);
            let raw = if fmt.is_signed() { raw } else { raw ^ 0x8000 };
            raw as i16
        }
        32 => {
            let raw = read_u32(bytes, fmt.endian);
            let raw = if fmt.is_signed() { raw } else { raw ^ 0x8000_0000 };
            ((raw as i32) >> 16) as i16
        }
        _ => 0,
    }
}

/// Decode one sample of `fmt` to float in `[-1.0, 1.0]`
pub fn decode_f32(bytes: &[u8], fmt: &PcmFormat) -> f32 {
    if fmt.bits == 32 {
        let raw = read_u32(bytes, fmt.endian);
        let raw = if fmt.is_signed() { raw } else { raw ^ 0x8000_0000 };
        let v = raw as i32 as f64;
        let full_scale = if v >= 0.0 {
            SAMPLE_MAX_32BIT_P
        } else {
            SAMPLE_MAX_32BIT_N
        };
        return (v / full_scale) as f32;
    }
    s16_to_f32(decode_s16(bytes, fmt))
}

/// Encode a float sample in `[-1.0, 1.0]` as `fmt` into `out`
pub fn encode_f32(v: f32, fmt: &PcmFormat, out: &mut [u8]) {
    match fmt.bits {
        8 => {
            let s = (f32_to_s16(v) >> 8) as i8 as u8;
            out[0] = if fmt.is_signed() { s } else { s ^ 0x80 };
        }
        16 => {
            let s = f32_to_s16(v) as u16;
            let s = if fmt.is_signed() { s } else { s ^ 0x8000 };
            let bytes = match fmt.endian {
                Endian::Little => s.to_le_bytes(),
                Endian::Big => s.to_be_bytes(),
            };
            out[..2].copy_from_slice(&bytes);
        }
        32 => {
            let v = v as f64;
            let full_scale = if v >= 0.0 {
                SAMPLE_MAX_32BIT_P
            } else {
                SAMPLE_MAX_32BIT_N
            };
            let s = (v * full_scale)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32 as u32;
            let s = if fmt.is_signed() { s } else { s ^ 0x8000_0000 };
            let bytes = match fmt.endian {
                Endian::Little => s.to_le_bytes(),
                Endian::Big => s.to_be_bytes(),
            };
            out[..4].copy_from_slice(&bytes);
        }
        _ => {}
    }
}

/// 16-bit sample to float, asymmetric full scale
pub fn s16_to_f32(s: i16) -> f32 {
    let v = s as f64;
    if v >= 0.0 {
        (v / SAMPLE_MAX_16BIT_P) as f32
    } else {
        (v / SAMPLE_MAX_16BIT_N) as f32
    }
}

/// Float sample to 16-bit, rounding and saturating
pub fn f32_to_s16(v: f32) -> i16 {
    let v = v as f64;
    let scaled = if v >= 0.0 {
        v * SAMPLE_MAX_16BIT_P
    } else {
        v * SAMPLE_MAX_16BIT_N
    };
    scaled.round().clamp(-32768.0, 32767.0) as i16
}

/// 8-bit PCM to interleaved 16-bit
///
/// Returns the number of output frames written.
pub fn move_d8_d16(
    dst: &mut [i16],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    remap: &Remap,
) -> usize {
    move_to_s16(dst, src, fmt, frames, remap, "move_d8_d16")
}

/// 16-bit PCM (either byte order and signedness) to interleaved native 16-bit
pub fn move_d16_d16(
    dst: &mut [i16],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    remap: &Remap,
) -> usize {
    move_to_s16(dst, src, fmt, frames, remap, "move_d16_d16")
}

/// 32-bit PCM to interleaved 16-bit, keeping the top 16 bits
pub fn move_d32_d16(
    dst: &mut [i16],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    remap: &Remap,
) -> usize {
    move_to_s16(dst, src, fmt, frames, remap, "move_d32_d16")
}

/// Raw PCM of any supported width to interleaved 16-bit
pub fn move_pcm_s16(
    dst: &mut [i16],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    remap: &Remap,
) -> usize {
    match fmt.bits {
        8 => move_d8_d16(dst, src, fmt, frames, remap),
        16 => move_d16_d16(dst, src, fmt, frames, remap),
        32 => move_d32_d16(dst, src, fmt, frames, remap),
        bits => {
            debug!("move_pcm_s16: unsupported width {} bits", bits);
            0
        }
    }
}

fn move_to_s16(
    dst: &mut [i16],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    remap: &Remap,
    what: &str,
) -> usize {
    let frame_bytes = fmt.frame_bytes();
    if frame_bytes == 0 {
        return 0;
    }
    let sample_bytes = fmt.sample_bytes();
    let out_frames = fit_frames(frames, dst.len(), remap.dst_channels, what);
    let dst_channels = remap.dst_channels;
    remap_frames(
        src.len() / frame_bytes,
        fmt.channels,
        out_frames,
        remap,
        |out, ch, frame, src_ch| {
            let at = frame * frame_bytes + src_ch * sample_bytes;
            dst[out * dst_channels + ch] = decode_s16(&src[at..], fmt);
        },
    )
}

/// One channel of interleaved 16-bit to float with volume
///
/// Reads `frames` samples starting at `src[channel]` with a stride of
/// `src_channels`. Returns the peak absolute output value.
pub fn move_d16_float(
    dst: &mut [f32],
    src: &[i16],
    frames: usize,
    src_channels: usize,
    channel: usize,
    volume: f32,
) -> f32 {
    if src_channels == 0 || channel >= src_channels {
        return 0.0;
    }
    let available = src.len().saturating_sub(channel).div_ceil(src_channels);
    let frames = fit_frames(frames, dst.len(), 1, "move_d16_float").min(available);

    let vol = volume as f64;
    let scale_p = SAMPLE_MAX_16BIT_P / vol;
    let scale_n = SAMPLE_MAX_16BIT_N / vol;
    let mut peak = 0.0f32;
    for (i, out) in dst.iter_mut().take(frames).enumerate() {
        let v = src[i * src_channels + channel] as f64;
        let f = (if v >= 0.0 { v / scale_p } else { v / scale_n }) as f32;
        let f = if f.is_finite() { f } else { 0.0 };
        peak = peak.max(f.abs());
        *out = f;
    }
    peak
}

/// Raw PCM to planar float with channel remap, resampling and volume
///
/// `dst` holds one buffer per output channel; `remap.dst_channels` is taken
/// from `dst.len()`. Returns the peak absolute output value.
pub fn move_pcm_float(
    dst: &mut [Vec<f32>],
    src: &[u8],
    fmt: &PcmFormat,
    frames: usize,
    scale: f64,
    bias: f64,
    volume: f32,
) -> f32 {
    let frame_bytes = fmt.frame_bytes();
    if frame_bytes == 0 || dst.is_empty() {
        return 0.0;
    }
    let shortest = dst.iter().map(Vec::len).min().unwrap_or(0);
    let out_frames = fit_frames(frames, shortest, 1, "move_pcm_float");
    let sample_bytes = fmt.sample_bytes();
    let remap = Remap::new(dst.len(), scale).with_bias(bias);

    let mut peak = 0.0f32;
    remap_frames(
        src.len() / frame_bytes,
        fmt.channels,
        out_frames,
        &remap,
        |out, ch, frame, src_ch| {
            let at = frame * frame_bytes + src_ch * sample_bytes;
            let v = decode_f32(&src[at..], fmt) * volume;
            peak = peak.max(v.abs());
            dst[ch][out] = v;
        },
    );
    peak
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_cursor_forward_unity() {
        let idx: Vec<usize> = SourceCursor::new(1.0, 5, 5, DEFAULT_RESAMPLE_BIAS).take(5).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cursor_half_speed_repeats_frames() {
        let idx: Vec<usize> = SourceCursor::new(0.5, 6, 3, DEFAULT_RESAMPLE_BIAS).take(6).collect();
        assert_eq!(idx, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_cursor_reverse_walks_back_from_region_end() {
        let idx: Vec<usize> = SourceCursor::new(-1.0, 4, 4, DEFAULT_RESAMPLE_BIAS).take(4).collect();
        assert_eq!(idx, vec![3, 2, 1, 0]);
        let idx: Vec<usize> = SourceCursor::new(-0.5, 4, 2, DEFAULT_RESAMPLE_BIAS).take(4).collect();
        assert_eq!(idx, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_cursor_clamps_to_source() {
        let idx: Vec<usize> = SourceCursor::new(2.0, 4, 3, DEFAULT_RESAMPLE_BIAS).take(4).collect();
        assert_eq!(idx, vec![0, 2, 2, 2]);
    }

    #[test]
    fn test_cursor_monotonic_for_any_scale() {
        for &scale in &[0.3, 0.999, 1.0, 1.7, 3.25] {
            let fwd: Vec<usize> = SourceCursor::new(scale, 200, 1000, DEFAULT_RESAMPLE_BIAS)
                .take(200)
                .collect();
            assert!(fwd.windows(2).all(|w| w[0] <= w[1]), "scale {}", scale);

            let rev: Vec<usize> = SourceCursor::new(-scale, 200, 1000, DEFAULT_RESAMPLE_BIAS)
                .take(200)
                .collect();
            assert!(rev.windows(2).all(|w| w[0] >= w[1]), "scale {}", -scale);
        }
    }

    #[test]
    fn test_s16_float_roundtrip_within_one_lsb() {
        for s in [i16::MIN, -32767, -1000, -1, 0, 1, 1000, 32766, i16::MAX] {
            let back = f32_to_s16(s16_to_f32(s));
            assert!((back as i32 - s as i32).abs() <= 1, "{} -> {}", s, back);
        }
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let fmt = PcmFormat::new(44100, 1, 16);
        let src = le16(&[10, -20, 30]);
        let mut dst = vec![0i16; 6];
        let n = move_d16_d16(&mut dst, &src, &fmt, 3, &Remap::new(2, 1.0));
        assert_eq!(n, 3);
        assert_eq!(dst, vec![10, 10, -20, -20, 30, 30]);
    }

    #[test]
    fn test_stereo_to_mono_drops_second_channel() {
        let fmt = PcmFormat::new(44100, 2, 16);
        let src = le16(&[1, 2, 3, 4]);
        let mut dst = vec![0i16; 2];
        move_d16_d16(&mut dst, &src, &fmt, 2, &Remap::new(1, 1.0));
        assert_eq!(dst, vec![1, 3]);
    }

    #[test]
    fn test_big_endian_unsigned_16() {
        let fmt = PcmFormat::new(44100, 1, 16)
            .with_signed(false)
            .with_endian(Endian::Big);
        // 0x8000 unsigned is zero, 0x8001 is +1, 0x7FFF is -1
        let src = [0x80, 0x00, 0x80, 0x01, 0x7F, 0xFF];
        let mut dst = vec![0i16; 3];
        move_pcm_s16(&mut dst, &src, &fmt, 3, &Remap::new(1, 1.0));
        assert_eq!(dst, vec![0, 1, -1]);
    }

    #[test]
    fn test_unsigned_8bit_to_16() {
        let fmt = PcmFormat::new(8000, 1, 8);
        let src = [0x80, 0xFF, 0x00];
        let mut dst = vec![0i16; 3];
        move_d8_d16(&mut dst, &src, &fmt, 3, &Remap::new(1, 1.0));
        assert_eq!(dst, vec![0, 127 << 8, -128 << 8]);
    }

    #[test]
    fn test_32bit_keeps_top_bits() {
        let fmt = PcmFormat::new(48000, 1, 32);
        let src: Vec<u8> = [0x1234_5678i32, -0x10000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut dst = vec![0i16; 2];
        move_d32_d16(&mut dst, &src, &fmt, 2, &Remap::new(1, 1.0));
        assert_eq!(dst, vec![0x1234, -1]);
    }

    #[test]
    fn test_zero_source_channels_is_noop() {
        let fmt = PcmFormat::new(44100, 0, 16);
        let mut dst = vec![7i16; 4];
        assert_eq!(move_pcm_s16(&mut dst, &[1, 2, 3, 4], &fmt, 2, &Remap::new(2, 1.0)), 0);
        assert_eq!(dst, vec![7; 4]);
    }

    #[test]
    fn test_short_destination_truncates() {
        let fmt = PcmFormat::new(44100, 1, 16);
        let src = le16(&[1, 2, 3, 4]);
        let mut dst = vec![0i16; 2];
        assert_eq!(move_d16_d16(&mut dst, &src, &fmt, 4, &Remap::new(1, 1.0)), 2);
        assert_eq!(dst, vec![1, 2]);
    }

    #[test]
    fn test_d16_float_applies_volume_and_reports_peak() {
        let src = [16384i16, -32768, 0, 8192];
        let mut left = vec![0.0f32; 2];
        let peak = move_d16_float(&mut left, &src, 2, 2, 0, 0.5);
        assert!((left[0] - 0.25).abs() < 1e-4);
        assert_eq!(left[1], 0.0);
        assert!((peak - 0.25).abs() < 1e-4);

        let mut right = vec![0.0f32; 2];
        move_d16_float(&mut right, &src, 2, 2, 1, 1.0);
        assert_eq!(right[0], -1.0);

        let mut silent = vec![1.0f32; 2];
        assert_eq!(move_d16_float(&mut silent, &src, 2, 2, 0, 0.0), 0.0);
        assert_eq!(silent, vec![0.0, 0.0]);
    }

    #[test]
    fn test_pcm_float_reverse_at_double_speed() {
        let fmt = PcmFormat::new(44100, 1, 16);
        let src = le16(&[0, 1000, 2000, 3000, 4000, 5000, 6000, 7000]);
        let mut dst = vec![vec![0.0f32; 4]];
        move_pcm_float(&mut dst, &src, &fmt, 4, -2.0, DEFAULT_RESAMPLE_BIAS, 1.0);
        let back: Vec<i16> = dst[0].iter().map(|&v| f32_to_s16(v)).collect();
        assert_eq!(back, vec![7000, 5000, 3000, 1000]);
    }

    #[test]
    fn test_encode_unsigned_8bit() {
        let fmt = PcmFormat::new(8000, 1, 8);
        let mut out = [0u8; 1];
        encode_f32(0.0, &fmt, &mut out);
        assert_eq!(out[0], 0x80);
        encode_f32(1.0, &fmt, &mut out);
        assert_eq!(out[0], 0xFF);
        encode_f32(-1.0, &fmt, &mut out);
        assert_eq!(out[0], 0x00);
    }

    #[test]
    fn test_decode_encode_32bit() {
        let fmt = PcmFormat::new(48000, 1, 32).with_endian(Endian::Big);
        let mut out = [0u8; 4];
        encode_f32(-0.5, &fmt, &mut out);
        assert_eq!(i32::from_be_bytes(out), -1 << 30);
        assert_eq!(decode_f32(&out, &fmt), -0.5);
    }
}
