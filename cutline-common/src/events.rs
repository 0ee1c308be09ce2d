//! Event-list model
//!
//! An event list is an ordered sequence of typed events, each stamped with a
//! non-decreasing timecode in ticks. Frame events carry the video frame shown
//! on every track plus optional audio-track changes; the remaining event types
//! describe the lifetime and parameters of effect instances.
//!
//! Lists are navigated through [`EventId`] handles (first/last/next/prev and
//! the frame-only variants) so callers never depend on storage layout.
//!
//! # Examples
//!
//! ```rust
//! use cutline_common::events::*;
//!
//! let mut list = EventList::new(None);
//! let first = list.push(0, EventKind::Frame(FrameEvent::single(1, 1))).unwrap();
//! list.push(4_000_000, EventKind::Frame(FrameEvent::single(1, 2))).unwrap();
//!
//! let second = list.next(first).unwrap();
//! assert_eq!(list[second].timecode, 4_000_000);
//! assert_eq!(list.last_frame(), Some(second));
//! ```

use crate::timing::Ticks;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Handle to an event within one [`EventList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub usize);

/// Identifies one effect instance from its init event to its deinit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilterInstanceId(pub u64);

/// Event type tag, for callers that only need to dispatch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Frame,
    FilterInit,
    FilterDeinit,
    ParamChange,
    FilterMap,
    Marker,
}

/// One video frame on one track
///
/// A clip number of zero or less marks a blank track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFrame {
    pub clip: i32,
    pub frame: i64,
}

impl TrackFrame {
    pub const BLANK: TrackFrame = TrackFrame { clip: 0, frame: 0 };

    pub fn new(clip: i32, frame: i64) -> Self {
        Self { clip, frame }
    }

    pub fn is_blank(&self) -> bool {
        self.clip <= 0 || self.frame <= 0
    }
}

/// Audio change on one track: from this point `clip` plays from `seek`
/// seconds at `velocity` (negative plays backwards, zero is silence)
///
/// Track numbers are signed; negative numbers address backing audio tracks
/// that have no video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioEntry {
    pub track: i32,
    pub clip: i32,
    pub seek: f64,
    pub velocity: f64,
}

impl AudioEntry {
    pub fn new(track: i32, clip: i32, seek: f64, velocity: f64) -> Self {
        Self {
            track,
            clip,
            seek,
            velocity,
        }
    }

    /// Entry switching the track off
    pub fn silence(track: i32) -> Self {
        Self::new(track, -1, 0.0, 0.0)
    }
}

/// Frame event payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameEvent {
    /// Frame per video track, indexed by track number
    pub tracks: Vec<TrackFrame>,
    /// Audio changes taking effect at this frame
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<AudioEntry>,
}

impl FrameEvent {
    pub fn new(tracks: Vec<TrackFrame>) -> Self {
        Self {
            tracks,
            audio: Vec::new(),
        }
    }

    /// Single-track frame event
    pub fn single(clip: i32, frame: i64) -> Self {
        Self::new(vec![TrackFrame::new(clip, frame)])
    }

    pub fn with_audio(mut self, entry: AudioEntry) -> Self {
        self.audio.push(entry);
        self
    }

    pub fn track(&self, track: usize) -> TrackFrame {
        self.tracks.get(track).copied().unwrap_or(TrackFrame::BLANK)
    }

    pub fn audio_for(&self, track: i32) -> Option<&AudioEntry> {
        self.audio.iter().find(|a| a.track == track)
    }

    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }
}

/// Start of an effect instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInit {
    pub id: FilterInstanceId,
    /// Effect identifier as known to the effects host
    pub filter: String,
    pub in_tracks: Vec<i32>,
    pub out_tracks: Vec<i32>,
}

/// End of an effect instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDeinit {
    pub id: FilterInstanceId,
}

/// New value for one parameter of a live effect instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamChange {
    pub id: FilterInstanceId,
    pub index: u32,
    pub value: Vec<f64>,
}

/// Ordered set of effect instances applied from this point on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterMap {
    pub active: Vec<FilterInstanceId>,
}

impl FilterMap {
    /// Copy of this map without the given instances
    pub fn without(&self, removed: &[FilterInstanceId]) -> FilterMap {
        FilterMap {
            active: self
                .active
                .iter()
                .copied()
                .filter(|id| !removed.contains(id))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    BlockStart,
    BlockUnordered,
    RecordStart,
    RecordEnd,
}

/// Editing marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: MarkerKind,
    #[serde(default)]
    pub track: Option<i32>,
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Frame(FrameEvent),
    FilterInit(FilterInit),
    FilterDeinit(FilterDeinit),
    ParamChange(ParamChange),
    FilterMap(FilterMap),
    Marker(Marker),
}

/// One timed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timecode: Ticks,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(timecode: Ticks, kind: EventKind) -> Self {
        Self { timecode, kind }
    }

    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::Frame(_) => EventType::Frame,
            EventKind::FilterInit(_) => EventType::FilterInit,
            EventKind::FilterDeinit(_) => EventType::FilterDeinit,
            EventKind::ParamChange(_) => EventType::ParamChange,
            EventKind::FilterMap(_) => EventType::FilterMap,
            EventKind::Marker(_) => EventType::Marker,
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(self.kind, EventKind::Frame(_))
    }

    pub fn as_frame(&self) -> Option<&FrameEvent> {
        match &self.kind {
            EventKind::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_frame_mut(&mut self) -> Option<&mut FrameEvent> {
        match &mut self.kind {
            EventKind::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Ordered event list
///
/// `fps` is `Some` for lists on a fixed frame grid and `None` for
/// free-running (recorded) lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    fps: Option<f64>,
    events: Vec<Event>,
}

impl EventList {
    pub fn new(fps: Option<f64>) -> Self {
        Self {
            fps,
            events: Vec::new(),
        }
    }

    /// Build a list from events already in timecode order
    pub fn from_events(fps: Option<f64>, events: Vec<Event>) -> Result<Self> {
        if let Some(pair) = events.windows(2).find(|w| w[1].timecode < w[0].timecode) {
            return Err(Error::InvalidInput(format!(
                "event timecodes must be non-decreasing ({} after {})",
                pair[1].timecode, pair[0].timecode
            )));
        }
        Ok(Self { fps, events })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let list: EventList = serde_json::from_str(json)?;
        Self::from_events(list.fps, list.events)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn set_fps(&mut self, fps: Option<f64>) {
        self.fps = fps;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event; its timecode must not precede the current last event
    pub fn push(&mut self, timecode: Ticks, kind: EventKind) -> Result<EventId> {
        if let Some(last) = self.events.last() {
            if timecode < last.timecode {
                return Err(Error::InvalidInput(format!(
                    "event at {} would precede last event at {}",
                    timecode, last.timecode
                )));
            }
        }
        self.events.push(Event::new(timecode, kind));
        Ok(EventId(self.events.len() - 1))
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.0)
    }

    pub fn get_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.events.get_mut(id.0)
    }

    pub fn timecode(&self, id: EventId) -> Option<Ticks> {
        self.get(id).map(|e| e.timecode)
    }

    pub fn first(&self) -> Option<EventId> {
        (!self.events.is_empty()).then_some(EventId(0))
    }

    pub fn last(&self) -> Option<EventId> {
        self.events.len().checked_sub(1).map(EventId)
    }

    pub fn next(&self, id: EventId) -> Option<EventId> {
        let next = id.0 + 1;
        (next < self.events.len()).then_some(EventId(next))
    }

    pub fn prev(&self, id: EventId) -> Option<EventId> {
        id.0.checked_sub(1)
            .filter(|&i| i < self.events.len())
            .map(EventId)
    }

    pub fn first_frame(&self) -> Option<EventId> {
        self.events.iter().position(Event::is_frame).map(EventId)
    }

    pub fn last_frame(&self) -> Option<EventId> {
        self.events.iter().rposition(Event::is_frame).map(EventId)
    }

    /// Next frame event strictly after `id`
    pub fn next_frame(&self, id: EventId) -> Option<EventId> {
        let start = id.0 + 1;
        self.events
            .get(start..)?
            .iter()
            .position(Event::is_frame)
            .map(|offset| EventId(start + offset))
    }

    /// Previous frame event strictly before `id`
    pub fn prev_frame(&self, id: EventId) -> Option<EventId> {
        let end = id.0.min(self.events.len());
        self.events[..end]
            .iter()
            .rposition(Event::is_frame)
            .map(EventId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &Event)> {
        self.events.iter().enumerate().map(|(i, e)| (EventId(i), e))
    }

    /// Frame events only
    pub fn frames(&self) -> impl Iterator<Item = (EventId, Ticks, &FrameEvent)> {
        self.iter()
            .filter_map(|(id, e)| e.as_frame().map(|f| (id, e.timecode, f)))
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Rewrite every timecode through `map`, which must be monotonic
    pub fn retime<F>(&mut self, mut map: F) -> Result<()>
    where
        F: FnMut(Ticks) -> Ticks,
    {
        let mut last = Ticks::MIN;
        for event in &mut self.events {
            let timecode = map(event.timecode);
            if timecode < last {
                return Err(Error::InvalidInput(format!(
                    "retime produced decreasing timecode {} after {}",
                    timecode, last
                )));
            }
            event.timecode = timecode;
            last = timecode;
        }
        Ok(())
    }
}

impl Index<EventId> for EventList {
    type Output = Event;

    fn index(&self, id: EventId) -> &Event {
        &self.events[id.0]
    }
}

impl IndexMut<EventId> for EventList {
    fn index_mut(&mut self, id: EventId) -> &mut Event {
        &mut self.events[id.0]
    }
}
