//! Audio engine
//!
//! [`AudioEngine`] owns every piece of long-lived audio state: the
//! configuration, the clip catalog, the segment renderer with its open
//! readers, the realtime buffer, the optional cache worker and the cursor of
//! event-driven playback. Entry points take `&mut self`, so there is a
//! single owner and no hidden global state.

use super::cache_worker::CacheWorker;
use super::retry::{with_retry, RetryOutcome, RetryPolicy};
use crate::audio::{AudioBuffer, BufferFormat};
use crate::config::AudioConfig;
use crate::error::Result;
use crate::render::{
    ClipCatalog, EffectsHost, Fade, PcmWriter, RenderOutcome, RenderTarget, Segment,
    SegmentRenderer, TrackSpan,
};
use crate::timeline::preanalysis;
use crate::timeline::track_state::{apply_frame_event, audio_state_at, back_track_count};
use crate::timeline::{AudioTrackState, Quantizer};
use cutline_common::events::{EventId, EventList};
use cutline_common::timing::{
    samples_to_ticks, span_samples, ticks_to_samples, ticks_to_seconds, Ticks,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Where event-driven playback stopped
#[derive(Debug, Clone)]
struct EventCursor {
    timecode: Ticks,
    tracks: Vec<AudioTrackState>,
    back_tracks: usize,
    next_frame: Option<EventId>,
}

/// Audio core context
pub struct AudioEngine {
    config: AudioConfig,
    catalog: Arc<dyn ClipCatalog>,
    renderer: SegmentRenderer,
    quantizer: Quantizer,
    buffer: AudioBuffer,
    cache: Option<CacheWorker>,
    cursor: Option<EventCursor>,
}

impl AudioEngine {
    /// Create an engine; the realtime buffer uses the configured output
    /// rate and channel count
    pub fn new(config: AudioConfig, catalog: Arc<dyn ClipCatalog>) -> Result<Self> {
        config.validate()?;
        let output = config.render.output;
        let capacity = config.arena.bytes / (output.channels.max(1) * std::mem::size_of::<f32>());
        let buffer = AudioBuffer::new(output.channels, output.sample_rate, capacity, BufferFormat::Float);
        info!(
            "Audio engine ready: {} Hz, {} channels, {} frame arena",
            output.sample_rate, output.channels, capacity
        );

        Ok(Self {
            renderer: SegmentRenderer::new(&config),
            quantizer: Quantizer::new(&config.quantize),
            config,
            catalog,
            buffer,
            cache: None,
            cursor: None,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Realtime buffer filled by [`fill_from_events`](Self::fill_from_events)
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffer
    }

    pub fn renderer(&self) -> &SegmentRenderer {
        &self.renderer
    }

    /// Render a segment into any target
    pub fn render_segment(
        &mut self,
        tracks: &mut [TrackSpan],
        tc_start: Ticks,
        tc_end: Ticks,
        fade: Fade,
        target: RenderTarget<'_>,
        effects: Option<&mut dyn EffectsHost>,
    ) -> Result<RenderOutcome> {
        let segment = Segment {
            tracks,
            tc_start,
            tc_end,
            fade,
        };
        self.renderer.render(&*self.catalog, segment, target, effects)
    }

    /// Render a segment to a file, letting `policy` decide on failures
    ///
    /// A retry restores the track positions, reopens the failed clips and
    /// rewrites the same byte range of the output.
    pub fn render_to_file(
        &mut self,
        writer: &mut PcmWriter,
        tracks: &mut [TrackSpan],
        tc_start: Ticks,
        tc_end: Ticks,
        fade: Fade,
        policy: &mut dyn RetryPolicy,
    ) -> Result<(RenderOutcome, RetryOutcome)> {
        let initial = tracks.to_vec();
        let catalog = Arc::clone(&self.catalog);
        let renderer = &mut self.renderer;

        with_retry(policy, |attempt| {
            if attempt > 1 {
                tracks.copy_from_slice(&initial);
            }
            let segment = Segment {
                tracks: &mut *tracks,
                tc_start,
                tc_end,
                fade,
            };
            let outcome = renderer.render(&*catalog, segment, RenderTarget::File(&mut *writer), None)?;
            for failure in &outcome.failures {
                if let Some(track) = failure.track {
                    renderer.invalidate_clip(initial[track].clip);
                }
            }
            let failures = outcome.failures.clone();
            Ok((outcome, failures))
        })
    }

    /// Render the audio of `list` over `[from, to)` into the realtime buffer
    ///
    /// A call starting where the previous one stopped continues from the
    /// stored track state; any other start rebuilds it from the list. Stops
    /// early when the buffer is full; the next call then resumes from there.
    pub fn fill_from_events(
        &mut self,
        list: &EventList,
        from: Ticks,
        to: Ticks,
        mut effects: Option<&mut dyn EffectsHost>,
    ) -> Result<RenderOutcome> {
        let mut total = RenderOutcome {
            silent: true,
            ..RenderOutcome::default()
        };
        if to <= from {
            return Ok(total);
        }

        let mut cursor = match self.cursor.take() {
            Some(cursor) if cursor.timecode == from => cursor,
            _ => Self::seek_cursor(list, from),
        };

        loop {
            let next = cursor
                .next_frame
                .and_then(|id| list.timecode(id).map(|tc| (id, tc)))
                .filter(|&(_, tc)| tc < to);
            let span_end = next.map_or(to, |(_, tc)| tc);

            if span_end > cursor.timecode {
                let rate = self.buffer.sample_rate();
                let wanted = span_samples(cursor.timecode, span_end, rate);
                let host = effects.as_mut().map(|h| &mut **h as &mut dyn EffectsHost);
                let outcome = self.render_span(&mut cursor, span_end, host)?;
                let rendered = outcome.frames;
                merge(&mut total, outcome);
                if rendered < wanted {
                    let reached = ticks_to_samples(cursor.timecode, rate) + rendered;
                    cursor.timecode = samples_to_ticks(reached, rate);
                    debug!("Realtime buffer full at {}", cursor.timecode);
                    self.cursor = Some(cursor);
                    return Ok(total);
                }
                cursor.timecode = span_end;
            }

            let Some((id, tc)) = next else {
                break;
            };
            if let Some(frame) = list[id].as_frame() {
                apply_frame_event(&mut cursor.tracks, frame, cursor.back_tracks);
            }
            cursor.timecode = cursor.timecode.max(tc);
            cursor.next_frame = list.next_frame(id);
        }

        self.cursor = Some(cursor);
        Ok(total)
    }

    /// Forget where event-driven playback stopped
    pub fn reset_playback(&mut self) {
        self.cursor = None;
    }

    /// Timecode the next continuing [`fill_from_events`](Self::fill_from_events) starts at
    pub fn playback_position(&self) -> Option<Ticks> {
        self.cursor.as_ref().map(|c| c.timecode)
    }

    fn seek_cursor(list: &EventList, from: Ticks) -> EventCursor {
        let back_tracks = back_track_count(list);
        let last_before = list
            .frames()
            .take_while(|&(_, tc, _)| tc <= from)
            .last()
            .map(|(id, tc, _)| (id, tc));

        match last_before {
            Some((id, tc)) => {
                let mut tracks = audio_state_at(list, id);
                let seconds = ticks_to_seconds(from - tc);
                tracks.iter_mut().for_each(|t| t.advance(seconds));
                EventCursor {
                    timecode: from,
                    tracks,
                    back_tracks,
                    next_frame: list.next_frame(id),
                }
            }
            None => EventCursor {
                timecode: from,
                tracks: Vec::new(),
                back_tracks,
                next_frame: list.first_frame(),
            },
        }
    }

    fn render_span(
        &mut self,
        cursor: &mut EventCursor,
        end: Ticks,
        effects: Option<&mut dyn EffectsHost>,
    ) -> Result<RenderOutcome> {
        let mut spans: Vec<TrackSpan> = cursor.tracks.iter().map(AudioTrackState::to_span).collect();
        let segment = Segment {
            tracks: &mut spans,
            tc_start: cursor.timecode,
            tc_end: end,
            fade: Fade::default(),
        };
        let outcome = self.renderer.render(
            &*self.catalog,
            segment,
            RenderTarget::Memory(&mut self.buffer),
            effects,
        )?;
        for (state, span) in cursor.tracks.iter_mut().zip(&spans) {
            state.seek = span.start_time;
        }
        Ok(outcome)
    }

    /// Quantize `list` onto a `fps` grid, with pre-analysis when configured
    pub fn quantize(&self, list: &EventList, fps: f64) -> Result<EventList> {
        if self.config.quantize.pre_analysis {
            let (prepared, _) = preanalysis::analyse(list, &self.config.quantize)?;
            return self.quantizer.quantize(&prepared, fps);
        }
        self.quantizer.quantize(list, fps)
    }

    /// Start the background cache worker if it is not running
    pub fn start_cache(&mut self) -> Result<&CacheWorker> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => CacheWorker::start(&self.config)?,
        };
        Ok(self.cache.insert(cache))
    }

    pub fn cache(&self) -> Option<&CacheWorker> {
        self.cache.as_ref()
    }

    pub fn stop_cache(&mut self) {
        if let Some(cache) = self.cache.take() {
            cache.shutdown();
        }
    }

    /// Stop the cache worker and close every open reader
    pub fn shutdown(mut self) {
        self.stop_cache();
        self.renderer.close_readers();
        info!("Audio engine shut down");
    }
}

fn merge(total: &mut RenderOutcome, part: RenderOutcome) {
    total.frames += part.frames;
    total.failures.extend(part.failures);
    total.peak_scratch_bytes = total.peak_scratch_bytes.max(part.peak_scratch_bytes);
    total.silent &= part.silent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::PcmFormat;
    use crate::audio::Consumer;
    use crate::error::IoFailure;
    use crate::playback::retry::MaxAttempts;
    use crate::render::{BlockInfo, ClipAudio, ClipTable, Handoff};
    use cutline_common::events::{AudioEntry, EventKind, FrameEvent};
    use cutline_common::timing::{grid_tick, TICKS_PER_SECOND};
    use tempfile::{tempdir, TempDir};

    const RATE: u32 = 1000;

    fn engine_with_ramp() -> (TempDir, AudioEngine) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.pcm");
        let bytes: Vec<u8> = (0..2000i16).flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        let mut catalog = ClipTable::new();
        catalog.insert(1, ClipAudio::new(&path, PcmFormat::new(RATE, 1, 16)));
        let mut config = AudioConfig::default();
        config.render.output = PcmFormat::new(RATE, 1, 16);
        let mut engine = AudioEngine::new(config, Arc::new(catalog)).unwrap();
        engine.buffer_mut().attach(Consumer::Audio);
        (dir, engine)
    }

    fn playing_list() -> EventList {
        let mut list = EventList::new(Some(25.0));
        list.push(
            0,
            EventKind::Frame(FrameEvent::single(1, 1).with_audio(AudioEntry::new(0, 1, 0.0, 1.0))),
        )
        .unwrap();
        list.push(TICKS_PER_SECOND, EventKind::Frame(FrameEvent::single(1, 26)))
            .unwrap();
        list
    }

    fn drain(engine: &mut AudioEngine) -> Vec<i16> {
        let n = engine.buffer().available(Consumer::Audio);
        let mut out = vec![0i16; n];
        engine.buffer_mut().read_int16(Consumer::Audio, &mut out, n);
        out
    }

    #[test]
    fn test_consecutive_fills_continue_playback() {
        let (_dir, mut engine) = engine_with_ramp();
        let list = playing_list();

        let quarter = TICKS_PER_SECOND / 4;
        engine.fill_from_events(&list, 0, quarter, None).unwrap();
        assert_eq!(engine.playback_position(), Some(quarter));
        let outcome = engine.fill_from_events(&list, quarter, 2 * quarter, None).unwrap();
        assert!(!outcome.silent);

        let samples = drain(&mut engine);
        assert_eq!(samples, (0..500).collect::<Vec<i16>>());
    }

    #[test]
    fn test_fill_after_jump_rebuilds_state() {
        let (_dir, mut engine) = engine_with_ramp();
        let list = playing_list();

        let start = 3 * TICKS_PER_SECOND / 10;
        engine
            .fill_from_events(&list, start, start + TICKS_PER_SECOND / 100, None)
            .unwrap();
        assert_eq!(drain(&mut engine), (300..310).collect::<Vec<i16>>());
    }

    #[test]
    fn test_quantize_uses_configured_thresholds() {
        let (_dir, engine) = engine_with_ramp();
        let out = engine.quantize(&playing_list(), 25.0).unwrap();
        assert_eq!(out.frames().count(), 26);
    }

    /// Engine whose catalog also lists clip 2 at a path that does not exist yet
    fn engine_with_late_clip() -> (TempDir, std::path::PathBuf, AudioEngine) {
        let (dir, _) = engine_with_ramp();
        let fmt = PcmFormat::new(RATE, 1, 16);
        let late = dir.path().join("late.pcm");

        let mut catalog = ClipTable::new();
        catalog.insert(1, ClipAudio::new(dir.path().join("ramp.pcm"), fmt));
        catalog.insert(2, ClipAudio::new(&late, fmt));
        let mut config = AudioConfig::default();
        config.render.output = fmt;
        let engine = AudioEngine::new(config, Arc::new(catalog)).unwrap();
        (dir, late, engine)
    }

    #[test]
    fn test_render_to_file_retry_reopens_clip() {
        let (dir, late, mut engine) = engine_with_late_clip();
        let out_path = dir.path().join("out.pcm");
        let mut writer = PcmWriter::create(&out_path, engine.config().render.output).unwrap();
        let mut tracks = [TrackSpan::new(1, 0.0, 1.0), TrackSpan::new(2, 0.0, 1.0)];

        let mut attempts = Vec::new();
        let mut policy = |failure: &IoFailure, attempt: u32| {
            attempts.push(attempt);
            assert_eq!(failure.track, Some(1));
            std::fs::write(&late, vec![0u8; 2000]).unwrap();
            RetryOutcome::Retry
        };
        let (outcome, result) = engine
            .render_to_file(
                &mut writer,
                &mut tracks,
                0,
                TICKS_PER_SECOND / 2,
                Fade::default(),
                &mut policy,
            )
            .unwrap();
        drop(writer);

        assert_eq!(attempts, vec![1]);
        assert_eq!(result, RetryOutcome::Proceeded);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.frames, 500);

        // Positions advanced once, not once per attempt
        assert!((tracks[0].start_time - 0.5).abs() < 1e-9);
        assert!((tracks[1].start_time - 0.5).abs() < 1e-9);

        let samples: Vec<i16> = std::fs::read(&out_path)
            .unwrap()
            .chunks(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, (0..500).collect::<Vec<i16>>());
    }

    #[test]
    fn test_render_to_file_proceeds_after_max_attempts() {
        let (dir, _late, mut engine) = engine_with_late_clip();
        let mut writer =
            PcmWriter::create(dir.path().join("out.pcm"), engine.config().render.output).unwrap();
        let mut tracks = [TrackSpan::new(1, 0.0, 1.0), TrackSpan::new(2, 3.0, 1.0)];

        let (outcome, result) = engine
            .render_to_file(
                &mut writer,
                &mut tracks,
                0,
                TICKS_PER_SECOND / 4,
                Fade::default(),
                &mut MaxAttempts(2),
            )
            .unwrap();

        assert_eq!(result, RetryOutcome::Proceeded);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.is_degraded());
        assert_eq!(writer.len(), 500);
        assert!((tracks[1].start_time - 3.25).abs() < 1e-9);
    }

    /// Host that only counts the frames it sees
    #[derive(Default)]
    struct FrameCounter {
        frames: usize,
    }

    impl EffectsHost for FrameCounter {
        fn process(&mut self, _buffers: &mut [Vec<f32>], info: &BlockInfo) -> Handoff {
            self.frames += info.frames;
            Handoff::Untouched
        }
    }

    #[test]
    fn test_fill_spans_sum_to_whole_duration() {
        let (_dir, mut engine) = engine_with_ramp();
        let fps = 30000.0 / 1001.0;
        let mut list = EventList::new(Some(fps));
        list.push(
            0,
            EventKind::Frame(FrameEvent::single(1, 1).with_audio(AudioEntry::new(0, 1, 0.0, 1.0))),
        )
        .unwrap();
        for i in 1..40 {
            list.push(grid_tick(i, fps), EventKind::Frame(FrameEvent::single(1, i + 1)))
                .unwrap();
        }

        // Every frame span is 33.37 samples at 1 kHz
        let end = grid_tick(40, fps);
        let mut host = FrameCounter::default();
        let outcome = engine
            .fill_from_events(&list, 0, end, Some(&mut host as &mut dyn EffectsHost))
            .unwrap();

        assert_eq!(outcome.frames, 1335);
        assert_eq!(host.frames, 1335);
        assert_eq!(engine.playback_position(), Some(end));
        assert_eq!(drain(&mut engine), (0..1335).collect::<Vec<i16>>());
    }

    #[test]
    fn test_arena_bytes_cover_every_channel() {
        let mut config = AudioConfig::default();
        config.arena.bytes = 800_000;
        config.render.output = PcmFormat::new(RATE, 2, 16);
        let engine = AudioEngine::new(config, Arc::new(ClipTable::new())).unwrap();
        assert_eq!(engine.buffer().capacity(), 100_000);
        assert_eq!(engine.buffer().channels(), 2);
    }

    #[test]
    fn test_cache_starts_once() {
        let (_dir, mut engine) = engine_with_ramp();
        assert!(engine.cache().is_none());
        engine.start_cache().unwrap();
        engine.start_cache().unwrap();
        assert!(engine.cache().is_some());
        engine.shutdown();
    }
}
