//! Event-list time quantizer
//!
//! Re-times an event list onto a fixed `1/fps` grid. Every input event is
//! assigned to the nearest output tick (ties go to the earlier tick, events
//! past the end go to the last tick). Each tick then emits, in order:
//!
//! 1. filter inits of the tick, each followed by its own param changes
//! 2. the filter map, when it changed
//! 3. the remaining param changes
//! 4. exactly one frame event, carrying the audio changes of the tick
//! 5. markers
//! 6. filter deinits, then the map without the removed instances
//!
//! Moving an audio change by up to half a tick shifts where the previous
//! change on that track ends up. The velocity of the previous change is
//! nudged so that it still reaches the recorded seek position at the new
//! switch time. Nudges are bounded by `max_velocity_change` (relative) and
//! `max_seek_error` (seconds); the remainder is accepted as drift.
//!
//! The output is built completely before it is returned. An allocation
//! failure discards it and the caller keeps its own list.

use crate::config::QuantizeConfig;
use crate::error::{Error, Result};
use cutline_common::events::{
    AudioEntry, Event, EventId, EventKind, EventList, FilterInstanceId, FilterMap, FrameEvent,
    TrackFrame,
};
use cutline_common::timing::{grid_tick, ticks_to_seconds, Ticks};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Where the frame of one output tick came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameSource {
    /// Copied from the nearest input frame
    Nearest(EventId),
    /// Frame numbers interpolated between the bracketing input frames
    Interpolated {
        before: EventId,
        after: EventId,
        fraction: f64,
    },
    /// Live-capture frame: copied verbatim from the nearest input frame,
    /// never interpolated
    Capture(EventId),
}

impl FrameSource {
    /// Input frame the output frame mostly derives from
    pub fn event(&self) -> EventId {
        match *self {
            FrameSource::Nearest(id) | FrameSource::Capture(id) => id,
            FrameSource::Interpolated {
                before,
                after,
                fraction,
            } => {
                if fraction <= 0.5 {
                    before
                } else {
                    after
                }
            }
        }
    }
}

/// Statistics of one quantize run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantizeReport {
    /// Output ticks, one frame event each
    pub ticks: usize,
    /// Frame source per output tick
    pub sources: Vec<FrameSource>,
    /// Velocity nudges applied to earlier audio changes
    pub adjustments: usize,
    /// Nudges that hit a threshold
    pub capped: usize,
    /// Largest seek error (seconds) left after nudging
    pub max_residual: f64,
}

/// Re-times event lists onto a fixed frame grid
#[derive(Debug, Clone)]
pub struct Quantizer {
    config: QuantizeConfig,
}

impl Quantizer {
    pub fn new(config: &QuantizeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &QuantizeConfig {
        &self.config
    }

    /// Quantize `list` onto a `fps` grid
    pub fn quantize(&self, list: &EventList, fps: f64) -> Result<EventList> {
        self.quantize_with_report(list, fps).map(|(list, _)| list)
    }

    /// Quantize `list` and report how every tick was built
    pub fn quantize_with_report(&self, list: &EventList, fps: f64) -> Result<(EventList, QuantizeReport)> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::InvalidState(format!("cannot quantize to {} fps", fps)));
        }
        let Some(first) = list.first() else {
            return Ok((EventList::new(Some(fps)), QuantizeReport::default()));
        };

        let mut pass = Pass::new(&self.config, list, list[first].timecode, fps)?;
        pass.run()?;

        let Pass { out, report, .. } = pass;
        debug!(
            "Quantized {} events to {} at {} fps: {} ticks, {} audio adjustments ({} capped)",
            list.len(),
            out.len(),
            fps,
            report.ticks,
            report.adjustments,
            report.capped
        );
        Ok((EventList::from_events(Some(fps), out)?, report))
    }
}

/// Input frame with its normalised timecode
#[derive(Debug, Clone, Copy)]
struct FrameRef<'a> {
    id: EventId,
    tc: Ticks,
    frame: &'a FrameEvent,
}

/// Last audio change emitted on a track
#[derive(Debug, Clone, Copy)]
struct OutputAudio {
    /// Index of the carrying frame event in the output
    index: usize,
    tc: Ticks,
    seek: f64,
    velocity: f64,
}

/// Events collected for one output tick
#[derive(Debug, Default)]
struct Bucket {
    inits: Vec<EventId>,
    init_params: Vec<EventId>,
    params: Vec<EventId>,
    map: Option<FilterMap>,
    markers: Vec<EventId>,
    deinits: Vec<FilterInstanceId>,
    deinit_events: Vec<EventId>,
    /// Map that followed a deinit of this tick
    refreshed_map: Option<FilterMap>,
    /// Audio changes, latest per track
    audio: Vec<AudioEntry>,
}

struct Pass<'a> {
    config: &'a QuantizeConfig,
    list: &'a EventList,
    origin: Ticks,
    fps: f64,
    frames: Vec<FrameRef<'a>>,
    n_ticks: usize,
    frame_cursor: usize,
    current_map: Option<FilterMap>,
    last_out: HashMap<i32, OutputAudio>,
    out: Vec<Event>,
    report: QuantizeReport,
}

impl<'a> Pass<'a> {
    fn new(config: &'a QuantizeConfig, list: &'a EventList, origin: Ticks, fps: f64) -> Result<Self> {
        let mut frames = Vec::new();
        reserve(&mut frames, list.len())?;
        frames.extend(list.frames().map(|(id, tc, frame)| FrameRef {
            id,
            tc: tc - origin,
            frame,
        }));

        let n_ticks = tick_count(list, &frames, fps);
        let mut out = Vec::new();
        reserve(&mut out, list.len().max(n_ticks))?;
        let mut report = QuantizeReport::default();
        reserve(&mut report.sources, n_ticks)?;

        Ok(Self {
            config,
            list,
            origin,
            fps,
            frames,
            n_ticks,
            frame_cursor: 0,
            current_map: None,
            last_out: HashMap::new(),
            out,
            report,
        })
    }

    fn run(&mut self) -> Result<()> {
        let list = self.list;
        let events = list.events();
        let mut cursor = 0;
        for tick in 0..self.n_ticks {
            let mut bucket = Bucket::default();
            while cursor < events.len()
                && self.tick_for(events[cursor].timecode - self.origin) <= tick
            {
                self.accumulate(&mut bucket, EventId(cursor));
                cursor += 1;
            }
            self.emit(tick, bucket)?;
        }
        self.report.ticks = self.report.sources.len();
        Ok(())
    }

    /// Nearest output tick, ties to the earlier one, clamped to the last
    fn tick_for(&self, tc: Ticks) -> usize {
        let k = (ticks_to_seconds(tc) * self.fps - 0.5).ceil().max(0.0) as usize;
        k.min(self.n_ticks.saturating_sub(1))
    }

    fn accumulate(&self, bucket: &mut Bucket, id: EventId) {
        let event = &self.list[id];
        match &event.kind {
            EventKind::FilterInit(_) => bucket.inits.push(id),
            EventKind::ParamChange(change) => {
                let own_init = bucket.inits.iter().any(|&init| {
                    matches!(&self.list[init].kind, EventKind::FilterInit(i) if i.id == change.id)
                });
                if own_init {
                    bucket.init_params.push(id);
                } else {
                    bucket.params.push(id);
                }
            }
            EventKind::FilterMap(map) => {
                if bucket.deinits.is_empty() {
                    bucket.map = Some(map.clone());
                } else {
                    bucket.refreshed_map = Some(map.clone());
                }
            }
            EventKind::FilterDeinit(deinit) => {
                bucket.deinits.push(deinit.id);
                bucket.deinit_events.push(id);
            }
            EventKind::Marker(_) => bucket.markers.push(id),
            EventKind::Frame(frame) => {
                for entry in &frame.audio {
                    match bucket.audio.iter_mut().find(|e| e.track == entry.track) {
                        Some(slot) => *slot = *entry,
                        None => bucket.audio.push(*entry),
                    }
                }
            }
        }
    }

    fn emit(&mut self, tick: usize, bucket: Bucket) -> Result<()> {
        let tc = grid_tick(tick as i64, self.fps);

        for &init in &bucket.inits {
            self.copy(tc, init)?;
            let filter_id = match &self.list[init].kind {
                EventKind::FilterInit(filter) => filter.id,
                _ => continue,
            };
            for &param in &bucket.init_params {
                if matches!(&self.list[param].kind, EventKind::ParamChange(p) if p.id == filter_id) {
                    self.copy(tc, param)?;
                }
            }
        }

        if let Some(map) = bucket.map {
            if self.current_map.as_ref() != Some(&map) {
                self.push(tc, EventKind::FilterMap(map.clone()))?;
                self.current_map = Some(map);
            }
        }

        for &param in &bucket.params {
            self.copy(tc, param)?;
        }

        if !self.frames.is_empty() {
            let source = self.select_frame(tc);
            let mut frame = self.build_frame(source);
            let index = self.out.len();
            reserve(&mut frame.audio, bucket.audio.len())?;
            for entry in bucket.audio {
                self.adjust_previous(&entry, tc);
                self.last_out.insert(
                    entry.track,
                    OutputAudio {
                        index,
                        tc,
                        seek: entry.seek,
                        velocity: entry.velocity,
                    },
                );
                frame.audio.push(entry);
            }
            self.push(tc, EventKind::Frame(frame))?;
            self.report.sources.push(source);
        }

        for &marker in &bucket.markers {
            self.copy(tc, marker)?;
        }

        for &deinit in &bucket.deinit_events {
            self.copy(tc, deinit)?;
        }
        if !bucket.deinits.is_empty() {
            let refreshed = match bucket.refreshed_map {
                Some(map) => Some(map),
                None => self.current_map.as_ref().map(|m| m.without(&bucket.deinits)),
            };
            if let Some(map) = refreshed {
                if self.current_map.as_ref() != Some(&map) {
                    self.push(tc, EventKind::FilterMap(map.clone()))?;
                    self.current_map = Some(map);
                }
            }
        }
        Ok(())
    }

    fn select_frame(&mut self, tc: Ticks) -> FrameSource {
        let frames = &self.frames;
        while self.frame_cursor + 1 < frames.len() && frames[self.frame_cursor + 1].tc <= tc {
            self.frame_cursor += 1;
        }
        let before = frames[self.frame_cursor];
        let after = frames.get(self.frame_cursor + 1).copied();

        let bracket = match after {
            Some(after) if before.tc < tc => Some((before, after)),
            _ => None,
        };
        let Some((before, after)) = bracket else {
            return if self.is_capture(before.frame) {
                FrameSource::Capture(before.id)
            } else {
                FrameSource::Nearest(before.id)
            };
        };

        let nearer = if tc - before.tc <= after.tc - tc {
            before.id
        } else {
            after.id
        };
        if self.is_capture(before.frame) || self.is_capture(after.frame) {
            return FrameSource::Capture(nearer);
        }
        if self.list.fps().is_none() && self.config.interpolate {
            return FrameSource::Interpolated {
                before: before.id,
                after: after.id,
                fraction: (tc - before.tc) as f64 / (after.tc - before.tc) as f64,
            };
        }
        FrameSource::Nearest(nearer)
    }

    fn is_capture(&self, frame: &FrameEvent) -> bool {
        self.config
            .scrap_clip
            .is_some_and(|clip| frame.tracks.iter().any(|t| t.clip == clip))
    }

    fn frame_at(&self, id: EventId) -> Option<&'a FrameEvent> {
        let list: &'a EventList = self.list;
        list[id].as_frame()
    }

    fn build_frame(&self, source: FrameSource) -> FrameEvent {
        match source {
            FrameSource::Nearest(id) | FrameSource::Capture(id) => self
                .frame_at(id)
                .map(|f| FrameEvent::new(f.tracks.clone()))
                .unwrap_or_default(),
            FrameSource::Interpolated {
                before,
                after,
                fraction,
            } => {
                let (Some(b), Some(a)) = (self.frame_at(before), self.frame_at(after)) else {
                    return FrameEvent::default();
                };
                let n = b.tracks.len().max(a.tracks.len());
                let tracks = (0..n)
                    .map(|i| {
                        let (tb, ta) = (b.track(i), a.track(i));
                        if tb.clip == ta.clip && !tb.is_blank() && !ta.is_blank() {
                            let frame = tb.frame as f64 + (ta.frame - tb.frame) as f64 * fraction;
                            TrackFrame::new(tb.clip, frame.round() as i64)
                        } else if fraction <= 0.5 {
                            tb
                        } else {
                            ta
                        }
                    })
                    .collect();
                FrameEvent::new(tracks)
            }
        }
    }

    /// Nudge the previous audio change on `entry.track` so it reaches
    /// `entry.seek` when switching at `tc`
    ///
    /// Changes collapsed into the same tick are skipped over; only the
    /// surviving change's seek counts.
    fn adjust_previous(&mut self, entry: &AudioEntry, tc: Ticks) {
        let Some(prev_out) = self.last_out.get(&entry.track).copied() else {
            return;
        };
        if prev_out.velocity == 0.0 || tc <= prev_out.tc {
            return;
        }

        let span = ticks_to_seconds(tc - prev_out.tc);
        let target = entry.seek;
        let wanted = target - (prev_out.seek + prev_out.velocity * span);
        if wanted.abs() < 1e-12 {
            return;
        }

        let limit = self.config.max_seek_error;
        let mut velocity = prev_out.velocity + wanted.clamp(-limit, limit) / span;
        let a = prev_out.velocity * (1.0 - self.config.max_velocity_change);
        let b = prev_out.velocity * (1.0 + self.config.max_velocity_change);
        velocity = velocity.clamp(a.min(b), a.max(b));

        let residual = (target - (prev_out.seek + velocity * span)).abs();
        if residual > 1e-9 {
            self.report.capped += 1;
        }
        self.report.max_residual = self.report.max_residual.max(residual);
        self.report.adjustments += 1;
        trace!(
            "Track {} velocity {} -> {} over {:.4}s (residual {:.6}s)",
            entry.track,
            prev_out.velocity,
            velocity,
            span,
            residual
        );

        if let Some(previous) = self.out[prev_out.index]
            .as_frame_mut()
            .and_then(|f| f.audio.iter_mut().find(|a| a.track == entry.track))
        {
            previous.velocity = velocity;
        }
    }

    fn copy(&mut self, tc: Ticks, id: EventId) -> Result<()> {
        self.push(tc, self.list[id].kind.clone())
    }

    fn push(&mut self, tc: Ticks, kind: EventKind) -> Result<()> {
        reserve(&mut self.out, 1)?;
        self.out.push(Event::new(tc, kind));
        Ok(())
    }
}

fn reserve<T>(vec: &mut Vec<T>, additional: usize) -> Result<()> {
    vec.try_reserve(additional)
        .map_err(|e| Error::ResourceExhausted(format!("quantized event list: {}", e)))
}

/// Output ticks needed to cover the input
///
/// The duration is the last frame's timecode plus its length: one frame of
/// the input rate, else the previous frame interval, else one output frame.
fn tick_count(list: &EventList, frames: &[FrameRef<'_>], fps: f64) -> usize {
    let Some(last) = frames.last() else {
        // Non-frame events only: everything lands on tick 0
        return 1;
    };
    let last_len = match list.fps() {
        Some(in_fps) if in_fps > 0.0 => 1.0 / in_fps,
        _ => match frames.len().checked_sub(2).map(|i| frames[i]) {
            Some(prev) if last.tc > prev.tc => ticks_to_seconds(last.tc - prev.tc),
            _ => 1.0 / fps,
        },
    };
    let duration = ticks_to_seconds(last.tc) + last_len;
    ((duration * fps - 1e-6).ceil() as usize).max(1)
}
