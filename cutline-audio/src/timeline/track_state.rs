//! Audio track state
//!
//! Frame events only record audio *changes*. The state of every track at a
//! given event is rebuilt by walking the list from the start, applying each
//! change and advancing the seek of playing tracks by `velocity * elapsed`.

use crate::render::TrackSpan;
use cutline_common::events::{EventId, EventList, FrameEvent};
use cutline_common::timing::{ticks_to_seconds, Ticks};

/// Playback state of one audio track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTrackState {
    /// Clip playing on the track, -1 when none
    pub clip: i32,
    /// Read position in seconds
    pub seek: f64,
    /// Signed playback rate; zero is silence
    pub velocity: f64,
}

impl Default for AudioTrackState {
    fn default() -> Self {
        Self {
            clip: -1,
            seek: 0.0,
            velocity: 0.0,
        }
    }
}

impl AudioTrackState {
    pub fn new(clip: i32, seek: f64, velocity: f64) -> Self {
        Self {
            clip,
            seek,
            velocity,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.velocity == 0.0 || self.clip < 0
    }

    /// Move the seek forward by `seconds` of playback
    pub fn advance(&mut self, seconds: f64) {
        if !self.is_silent() {
            self.seek += self.velocity * seconds;
        }
    }

    pub fn to_span(&self) -> TrackSpan {
        TrackSpan::new(self.clip, self.seek, self.velocity)
    }
}

/// Apply the audio changes of one frame event
///
/// Entry track numbers are shifted by `back_tracks` so backing tracks
/// (negative numbers) land at the front of `states`. The vector grows as
/// needed; entries that still map below zero are ignored.
pub fn apply_frame_event(states: &mut Vec<AudioTrackState>, frame: &FrameEvent, back_tracks: usize) {
    for entry in &frame.audio {
        let Ok(index) = usize::try_from(i64::from(entry.track) + back_tracks as i64) else {
            continue;
        };
        if states.len() <= index {
            states.resize(index + 1, AudioTrackState::default());
        }
        states[index] = AudioTrackState::new(entry.clip, entry.seek, entry.velocity);
    }
}

/// Number of backing tracks addressed by a list
pub fn back_track_count(list: &EventList) -> usize {
    list.frames()
        .flat_map(|(_, _, frame)| frame.audio.iter())
        .map(|entry| entry.track)
        .filter(|&track| track < 0)
        .map(|track| track.unsigned_abs() as usize)
        .max()
        .unwrap_or(0)
}

/// Audio state of every track at the timecode of event `at`
///
/// Frame events up to and including `at` are applied; seeks are advanced to
/// the timecode of `at`.
pub fn audio_state_at(list: &EventList, at: EventId) -> Vec<AudioTrackState> {
    let back_tracks = back_track_count(list);
    let mut states = Vec::new();
    let Some(target) = list.timecode(at) else {
        return states;
    };

    let mut last_tc: Option<Ticks> = None;
    for (id, tc, frame) in list.frames() {
        if id > at {
            break;
        }
        advance_all(&mut states, last_tc, tc);
        apply_frame_event(&mut states, frame, back_tracks);
        last_tc = Some(tc);
    }
    advance_all(&mut states, last_tc, target);
    states
}

fn advance_all(states: &mut [AudioTrackState], from: Option<Ticks>, to: Ticks) {
    if let Some(from) = from {
        let seconds = ticks_to_seconds(to - from);
        states.iter_mut().for_each(|s| s.advance(seconds));
    }
}
