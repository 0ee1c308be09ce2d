//! Segment renderer
//!
//! Renders the mix of N tracks over `[tc_start, tc_end)`:
//!
//! ```text
//! per chunk:   track file → raw bytes → move_pcm_float (resample, remap, volume)
//! per block:   [effects host] → mix → fade → clip limiter → file
//!                                         └→ float/int16 append → AudioBuffer
//! ```
//!
//! The span is cut into equal chunks small enough that every scratch buffer
//! of the call fits under `max_audio_mem`, so peak memory does not depend on
//! the span length. A failing track goes silent for the rest of the call and
//! is reported in [`RenderOutcome::failures`]; the render itself carries on.

use super::catalog::ClipCatalog;
use super::effects::{run_host, BlockInfo, EffectsHost};
use super::pcm_file::{PcmReader, PcmWriter, ReaderCache};
use crate::audio::format::move_pcm_float;
use crate::audio::types::PcmFormat;
use crate::audio::{AudioBuffer, ClipLimiter};
use crate::config::AudioConfig;
use crate::error::{IoFailure, IoOperation, Result};
use cutline_common::timing::{samples_to_ticks, span_samples, ticks_to_samples, Ticks};
use std::io;
use tracing::{debug, warn};

/// One track's contribution to a segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSpan {
    pub clip: i32,
    /// Read position in seconds; updated by the render
    pub start_time: f64,
    /// Playback rate; negative plays backwards, zero is silence
    pub velocity: f64,
    /// Linear gain
    pub volume: f32,
}

impl TrackSpan {
    pub fn new(clip: i32, start_time: f64, velocity: f64) -> Self {
        Self {
            clip,
            start_time,
            velocity,
            volume: 1.0,
        }
    }

    pub fn silent() -> Self {
        Self::new(-1, 0.0, 0.0)
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn is_silent(&self) -> bool {
        self.velocity == 0.0 || self.clip < 0
    }
}

/// Output gain ramp across a segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    pub start: f32,
    pub end: f32,
}

impl Default for Fade {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl Fade {
    pub fn constant(volume: f32) -> Self {
        Self {
            start: volume,
            end: volume,
        }
    }

    pub fn ramp(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Gain at `progress` (0.0 to 1.0) through the segment
    pub fn at(&self, progress: f64) -> f32 {
        if self.start == self.end {
            return self.start;
        }
        self.start + (self.end - self.start) * progress.clamp(0.0, 1.0) as f32
    }
}

/// Tracks and span of one render call
#[derive(Debug)]
pub struct Segment<'a> {
    pub tracks: &'a mut [TrackSpan],
    pub tc_start: Ticks,
    pub tc_end: Ticks,
    pub fade: Fade,
}

/// Where rendered audio goes
pub enum RenderTarget<'a> {
    /// Clip-limited integer PCM at the writer's format
    File(&'a mut PcmWriter),
    /// Float or int16 append at the buffer's rate and channel count
    Memory(&'a mut AudioBuffer),
}

/// Result of one render call
#[derive(Debug, Default)]
pub struct RenderOutcome {
    /// Output frames produced
    pub frames: usize,
    /// Per-track and output I/O failures, in the order they happened
    pub failures: Vec<IoFailure>,
    /// Largest scratch footprint held during the call, in bytes
    pub peak_scratch_bytes: usize,
    /// No track contributed audio
    pub silent: bool,
}

impl RenderOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Track prepared for one render call
#[derive(Debug)]
struct ActiveTrack {
    index: usize,
    clip: i32,
    format: PcmFormat,
    /// `None` once the track has failed
    reader: Option<PcmReader>,
    /// Byte position in the source; may run past either end of the file
    seek: u64,
    /// Source frames per output frame, signed
    zavel: f64,
    volume: f32,
}

impl ActiveTrack {
    fn source_bytes(&self, frames: usize) -> usize {
        (frames as f64 * self.zavel.abs()).round() as usize * self.format.frame_bytes()
    }

    fn advance(&mut self, bytes: usize) {
        if self.zavel > 0.0 {
            self.seek += bytes as u64;
        } else {
            self.seek = self.seek.saturating_sub(bytes as u64);
        }
    }
}

/// Scratch buffers of one render call
struct Scratch {
    tracks: Vec<Vec<Vec<f32>>>,
    raw: Vec<u8>,
    blocks: Vec<Vec<f32>>,
    mix: Vec<Vec<f32>>,
    encoded: Vec<u8>,
}

impl Scratch {
    fn bytes(&self) -> usize {
        let float = std::mem::size_of::<f32>();
        let planar = |v: &Vec<Vec<f32>>| v.iter().map(|c| c.capacity() * float).sum::<usize>();
        self.tracks.iter().map(planar).sum::<usize>()
            + self.raw.capacity()
            + planar(&self.blocks)
            + planar(&self.mix)
            + self.encoded.capacity()
    }
}

/// Renders multi-track segments with bounded scratch memory
#[derive(Debug)]
pub struct SegmentRenderer {
    max_audio_mem: usize,
    block_size: usize,
    bias: f64,
    readers: ReaderCache,
    limiter: ClipLimiter,
}

impl SegmentRenderer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            max_audio_mem: config.render.max_audio_mem,
            block_size: config.render.block_size.max(1),
            bias: config.resample.bias,
            readers: ReaderCache::new(config.render.stored_fds),
            limiter: ClipLimiter::new(&config.limiter).with_bias(config.resample.bias),
        }
    }

    pub fn limiter(&self) -> &ClipLimiter {
        &self.limiter
    }

    /// Readers currently kept open between calls
    pub fn open_readers(&self) -> usize {
        self.readers.len()
    }

    /// Close every stored reader
    pub fn close_readers(&mut self) {
        self.readers.close_all();
    }

    /// Drop the stored reader of a clip whose audio file changed
    pub fn invalidate_clip(&mut self, clip: i32) {
        self.readers.invalidate(clip);
    }

    /// Render `segment` into `target`
    ///
    /// Each track's `start_time` is moved to its new read position. I/O
    /// failures are collected in the outcome rather than returned as errors;
    /// an error is only returned for an unusable output format.
    pub fn render(
        &mut self,
        catalog: &dyn ClipCatalog,
        segment: Segment<'_>,
        mut target: RenderTarget<'_>,
        mut effects: Option<&mut dyn EffectsHost>,
    ) -> Result<RenderOutcome> {
        let mut outcome = RenderOutcome::default();

        let (out_rate, out_channels, out_frame_bytes) = match &target {
            RenderTarget::File(writer) => {
                let fmt = writer.format();
                fmt.validate()?;
                (fmt.sample_rate, fmt.channels, fmt.frame_bytes())
            }
            RenderTarget::Memory(buffer) => (buffer.sample_rate(), buffer.channels(), 0),
        };
        if out_channels == 0 || out_rate == 0 {
            debug!("Render target has no channels, nothing to do");
            return Ok(outcome);
        }

        let mut total = span_samples(segment.tc_start, segment.tc_end, out_rate);
        if let RenderTarget::Memory(buffer) = &target {
            let room = buffer.free_space();
            if room < total {
                debug!("Render clamped to buffer space: {} of {} frames", room, total);
                total = room;
            }
        }
        if total == 0 {
            return Ok(outcome);
        }

        if let RenderTarget::File(writer) = &mut target {
            let offset =
                ticks_to_samples(segment.tc_start, out_rate) as u64 * out_frame_bytes as u64;
            if let Err(e) = writer.pad_to(offset) {
                warn!("Cannot position render output {}: {}", writer.path().display(), e);
                outcome
                    .failures
                    .push(IoFailure::new(None, writer.path(), IoOperation::Seek, &e));
                return Ok(outcome);
            }
        }

        let mut active = self.open_tracks(catalog, segment.tracks, out_rate, &mut outcome);

        if active.iter().all(|t| t.reader.is_none()) {
            outcome.silent = true;
            Self::write_silence(&mut target, total, &mut outcome);
            for track in &mut active {
                let bytes = track.source_bytes(total);
                track.advance(bytes);
            }
            self.finish_tracks(active, segment.tracks);
            return Ok(outcome);
        }

        // Equal chunks, the first `remainder` one frame longer
        let max_chunk = self.chunk_frames(&active, out_channels, out_frame_bytes);
        let segments = total.div_ceil(max_chunk);
        let base = total / segments;
        let remainder = total % segments;
        let chunk_len = base + usize::from(remainder > 0);
        let block_len = self.block_size.min(chunk_len);

        let mut scratch = Scratch {
            tracks: active
                .iter()
                .map(|_| vec![vec![0.0; chunk_len]; out_channels])
                .collect(),
            raw: vec![0; active.iter().map(|t| t.source_bytes(chunk_len)).max().unwrap_or(0)],
            blocks: if effects.is_some() {
                vec![Vec::with_capacity(block_len); active.len() * out_channels]
            } else {
                Vec::new()
            },
            mix: vec![vec![0.0; block_len]; out_channels],
            encoded: vec![0; block_len * out_frame_bytes],
        };
        self.limiter.shrink_scratch(block_len * out_channels);
        outcome.peak_scratch_bytes = scratch.bytes() + self.limiter.scratch_bytes();
        debug!(
            "Rendering {} frames, {} tracks, {} chunks of <= {} frames",
            total,
            active.len(),
            segments,
            chunk_len
        );

        let mut done = 0usize;
        'chunks: for chunk_index in 0..segments {
            let chunk = base + usize::from(chunk_index < remainder);
            for (track, bufs) in active.iter_mut().zip(scratch.tracks.iter_mut()) {
                Self::read_track(
                    track,
                    chunk,
                    &mut scratch.raw,
                    bufs,
                    self.bias,
                    &mut outcome.failures,
                );
            }

            let mut offset = 0;
            while offset < chunk {
                let n = block_len.min(chunk - offset);

                let hosted = match effects.as_mut().map(|h| &mut **h as &mut dyn EffectsHost) {
                    Some(host) => {
                        for (t, track_bufs) in scratch.tracks.iter().enumerate() {
                            for (ch, src) in track_bufs.iter().enumerate() {
                                let lent = &mut scratch.blocks[t * out_channels + ch];
                                lent.clear();
                                lent.extend_from_slice(&src[offset..offset + n]);
                            }
                        }
                        let info = BlockInfo {
                            rate: out_rate,
                            channels: out_channels,
                            tracks: active.len(),
                            frames: n,
                            timecode: segment.tc_start + samples_to_ticks(done, out_rate),
                        };
                        run_host(host, &mut scratch.blocks, &info);
                        true
                    }
                    None => false,
                };

                for (ch, mix) in scratch.mix.iter_mut().enumerate() {
                    let mix = &mut mix[..n];
                    mix.fill(0.0);
                    for t in 0..active.len() {
                        let src = if hosted {
                            &scratch.blocks[t * out_channels + ch][..n]
                        } else {
                            &scratch.tracks[t][ch][offset..offset + n]
                        };
                        for (m, s) in mix.iter_mut().zip(src) {
                            *m += s;
                        }
                    }
                }

                let volume = segment.fade.at(done as f64 / total as f64);
                match &mut target {
                    RenderTarget::File(writer) => {
                        let fmt = *writer.format();
                        let bytes = n * fmt.frame_bytes();
                        let channels: Vec<&[f32]> = scratch.mix.iter().map(|m| &m[..n]).collect();
                        self.limiter.move_float_int(
                            &mut scratch.encoded[..bytes],
                            &channels,
                            n,
                            1.0,
                            &fmt,
                            volume,
                        );
                        if let Err(e) = writer.write_all(&scratch.encoded[..bytes]) {
                            warn!("Render output write failed on {}: {}", writer.path().display(), e);
                            outcome
                                .failures
                                .push(IoFailure::new(None, writer.path(), IoOperation::Write, &e));
                            break 'chunks;
                        }
                    }
                    RenderTarget::Memory(buffer) => {
                        if volume != 1.0 {
                            for mix in scratch.mix.iter_mut() {
                                mix[..n].iter_mut().for_each(|s| *s *= volume);
                            }
                        }
                        buffer.append_float(&scratch.mix, n);
                    }
                }
                done += n;
                offset += n;
            }
            outcome.peak_scratch_bytes = outcome
                .peak_scratch_bytes
                .max(scratch.bytes() + self.limiter.scratch_bytes());
        }

        if let RenderTarget::File(writer) = &mut target {
            if let Err(e) = writer.flush() {
                outcome
                    .failures
                    .push(IoFailure::new(None, writer.path(), IoOperation::Write, &e));
            }
        }

        outcome.frames = done;
        self.finish_tracks(active, segment.tracks);
        Ok(outcome)
    }

    /// Largest chunk whose scratch buffers fit under the memory ceiling
    ///
    /// Per output frame: the float buffer of every track channel, the block
    /// copy lent to the effects host, the mix and limiter buffers, the encoded
    /// output and each track's raw input at its rate ratio. One extra input
    /// frame covers the rounding of the raw read size.
    fn chunk_frames(&self, active: &[ActiveTrack], out_channels: usize, out_frame_bytes: usize) -> usize {
        let float = std::mem::size_of::<f32>();
        let raw_per_frame = active
            .iter()
            .map(|t| t.zavel.abs() * t.format.frame_bytes() as f64)
            .fold(0.0, f64::max);
        let rounding = active
            .iter()
            .map(|t| t.format.frame_bytes())
            .max()
            .unwrap_or(0);
        let per_frame = (2 * active.len() * out_channels * float
            + 2 * out_channels * float
            + out_frame_bytes) as f64
            + raw_per_frame;

        let budget = self.max_audio_mem.saturating_sub(rounding) as f64;
        let frames = (budget / per_frame).floor() as usize;
        if frames == 0 {
            warn!(
                "Memory ceiling of {} bytes cannot hold one frame of {} tracks",
                self.max_audio_mem,
                active.len()
            );
            return 1;
        }
        frames
    }

    fn open_tracks(
        &mut self,
        catalog: &dyn ClipCatalog,
        tracks: &[TrackSpan],
        out_rate: u32,
        outcome: &mut RenderOutcome,
    ) -> Vec<ActiveTrack> {
        let mut active = Vec::new();
        for (index, span) in tracks.iter().enumerate() {
            if span.is_silent() {
                continue;
            }
            let Some(audio) = catalog.clip_audio(span.clip) else {
                debug!("Track {} clip {} has no audio", index, span.clip);
                continue;
            };
            if let Err(e) = audio.format.validate() {
                warn!("Track {} clip {} skipped: {}", index, span.clip, e);
                continue;
            }

            let reader = match self.readers.checkout(span.clip) {
                Some(reader) if reader.path() == audio.path && *reader.format() == audio.format => {
                    Ok(reader)
                }
                _ => PcmReader::open(&audio.path, audio.format),
            };
            let reader = match reader {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!("Track {} cannot open {}: {}", index, audio.path.display(), e);
                    outcome.failures.push(IoFailure::new(
                        Some(index),
                        &audio.path,
                        IoOperation::Open,
                        &e,
                    ));
                    None
                }
            };

            active.push(ActiveTrack {
                index,
                clip: span.clip,
                format: audio.format,
                reader,
                seek: audio.format.nearest_offset(span.start_time),
                zavel: span.velocity * audio.format.sample_rate as f64 / out_rate as f64,
                volume: span.volume,
            });
        }
        active
    }

    /// Read and convert one chunk of a track into `out`
    fn read_track(
        track: &mut ActiveTrack,
        chunk: usize,
        raw: &mut [u8],
        out: &mut [Vec<f32>],
        bias: f64,
        failures: &mut Vec<IoFailure>,
    ) {
        let wanted = track.source_bytes(chunk);
        let tbytes = wanted.min(raw.len());
        if tbytes < wanted {
            debug!(
                "Track {} read of {} bytes truncated to {}",
                track.index, wanted, tbytes
            );
        }

        if track.reader.is_none() {
            out.iter_mut().for_each(|c| c[..chunk].fill(0.0));
            track.advance(tbytes);
            return;
        }

        let raw = &mut raw[..tbytes];
        track.format.fill_silence(raw);

        // Reverse reads take the bytes before the seek position; anything
        // before the start of the file stays silent at the front
        let (start, lead) = if track.zavel > 0.0 {
            (track.seek, 0)
        } else {
            let start = track.seek.saturating_sub(tbytes as u64);
            (start, tbytes - (track.seek - start) as usize)
        };

        if let Some(reader) = track.reader.as_mut() {
            match read_region(reader, start, &mut raw[lead..]) {
                Ok(n) if n < tbytes - lead => {
                    debug!(
                        "Track {} short read at {}: {} of {} bytes, padding",
                        track.index,
                        start,
                        n,
                        tbytes - lead
                    );
                }
                Ok(_) => {}
                Err((operation, e)) => {
                    warn!(
                        "Track {} {} failed on {}: {}",
                        track.index,
                        operation,
                        reader.path().display(),
                        e
                    );
                    failures.push(IoFailure::new(Some(track.index), reader.path(), operation, &e));
                    track.reader = None;
                    track.format.fill_silence(raw);
                }
            }
        }

        if tbytes == 0 {
            out.iter_mut().for_each(|c| c[..chunk].fill(0.0));
        } else {
            move_pcm_float(out, raw, &track.format, chunk, track.zavel, bias, track.volume);
        }
        track.advance(tbytes);
    }

    fn write_silence(target: &mut RenderTarget<'_>, frames: usize, outcome: &mut RenderOutcome) {
        match target {
            RenderTarget::File(writer) => {
                let bytes = frames as u64 * writer.format().frame_bytes() as u64;
                match writer.write_silence(bytes).and_then(|_| writer.flush()) {
                    Ok(()) => outcome.frames = frames,
                    Err(e) => outcome.failures.push(IoFailure::new(
                        None,
                        writer.path(),
                        IoOperation::Write,
                        &e,
                    )),
                }
            }
            RenderTarget::Memory(buffer) => outcome.frames = buffer.append_silence(frames),
        }
    }

    /// Store new read positions and keep readers open where allowed
    fn finish_tracks(&mut self, active: Vec<ActiveTrack>, tracks: &mut [TrackSpan]) {
        for mut track in active {
            tracks[track.index].start_time = track.format.offset_to_seconds(track.seek);
            if let Some(reader) = track.reader.take() {
                if !self.readers.checkin(track.clip, reader) {
                    debug!("Closing reader for clip {}", track.clip);
                }
            }
        }
    }
}

fn read_region(
    reader: &mut PcmReader,
    start: u64,
    buf: &mut [u8],
) -> std::result::Result<usize, (IoOperation, io::Error)> {
    reader
        .seek_to(start)
        .map_err(|e| (IoOperation::Seek, e))?;
    reader.read_up_to(buf).map_err(|e| (IoOperation::Read, e))
}
