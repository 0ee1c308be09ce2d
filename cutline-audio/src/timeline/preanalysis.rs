//! Pre-analysis of unquantized lists
//!
//! Two optional passes, run on a copy of the input before quantizing:
//! - frame smoothing: inside short near-linear runs the middle frame number
//!   of each triple is replaced by a timecode-weighted interpolation of its
//!   neighbours
//! - rescaling (free-running lists only): each stretch between two audio
//!   changes is retimed so the seek distance the audio really covered
//!   matches the distance its velocity predicts. Factors outside
//!   `[rescale_min, rescale_max]` are treated as noise and left at 1.0.

use crate::config::QuantizeConfig;
use crate::error::Result;
use cutline_common::events::{EventId, EventList, FrameEvent};
use cutline_common::timing::{seconds_to_ticks, ticks_to_seconds, Ticks};
use tracing::debug;

/// What the pre-analysis changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreAnalysis {
    /// Track frames replaced by smoothing
    pub smoothed: usize,
    /// Audio segments retimed
    pub rescaled: usize,
}

/// Run both passes on a copy of `list`
pub fn analyse(list: &EventList, config: &QuantizeConfig) -> Result<(EventList, PreAnalysis)> {
    let mut copy = list.clone();
    let smoothed = smooth_frames(&mut copy, config);
    let rescaled = rescale(&mut copy, config)?;
    debug!(
        "Pre-analysis: {} frames smoothed, {} segments rescaled",
        smoothed, rescaled
    );
    Ok((copy, PreAnalysis { smoothed, rescaled }))
}

/// Smooth frame numbers of short near-linear runs
///
/// Returns the number of track frames changed.
pub fn smooth_frames(list: &mut EventList, config: &QuantizeConfig) -> usize {
    let frames: Vec<(EventId, Ticks)> = list.frames().map(|(id, tc, _)| (id, tc)).collect();
    let max_span = seconds_to_ticks(config.smooth_max_span);

    let mut replacements = Vec::new();
    for w in frames.windows(3) {
        let [(id0, tc0), (id1, tc1), (id2, tc2)] = [w[0], w[1], w[2]];
        if tc2 <= tc0 || tc2 - tc0 > max_span {
            continue;
        }
        let (Some(f0), Some(f1), Some(f2)) = (
            list[id0].as_frame(),
            list[id1].as_frame(),
            list[id2].as_frame(),
        ) else {
            continue;
        };

        for track in 0..f1.tracks.len() {
            let (a, b, c) = (f0.track(track), f1.track(track), f2.track(track));
            if a.clip != b.clip || b.clip != c.clip || b.is_blank() || a.is_blank() || c.is_blank() {
                continue;
            }
            if config.scrap_clip == Some(b.clip) {
                continue;
            }
            let lo = a.frame.min(b.frame).min(c.frame);
            let hi = a.frame.max(b.frame).max(c.frame);
            if hi - lo > config.smooth_max_frames {
                continue;
            }
            // One direction only
            if (b.frame - a.frame).signum() * (c.frame - b.frame).signum() < 0 {
                continue;
            }
            let fraction = (tc1 - tc0) as f64 / (tc2 - tc0) as f64;
            let smoothed = (a.frame as f64 + (c.frame - a.frame) as f64 * fraction).round() as i64;
            if smoothed != b.frame {
                replacements.push((id1, track, smoothed));
            }
        }
    }

    for &(id, track, frame) in &replacements {
        if let Some(f) = list[id].as_frame_mut() {
            f.tracks[track].frame = frame;
        }
    }
    replacements.len()
}

/// Retime a free-running list so audio seeks agree with elapsed time
///
/// Returns the number of segments whose duration changed.
pub fn rescale(list: &mut EventList, config: &QuantizeConfig) -> Result<usize> {
    if list.fps().is_some() {
        return Ok(0);
    }

    let changes: Vec<(Ticks, &FrameEvent)> = list
        .frames()
        .filter(|(_, _, f)| f.has_audio())
        .map(|(_, tc, f)| (tc, f))
        .collect();
    if changes.len() < 2 {
        return Ok(0);
    }

    // Knots of the piecewise-linear map: (old timecode, new timecode)
    let mut knots = Vec::with_capacity(changes.len());
    knots.push((changes[0].0, changes[0].0));
    let mut rescaled = 0;
    for pair in changes.windows(2) {
        let ((tc0, f0), (tc1, f1)) = (pair[0], pair[1]);
        let ratio = segment_ratio(f0, f1, ticks_to_seconds(tc1 - tc0))
            .filter(|r| (config.rescale_min..=config.rescale_max).contains(r))
            .unwrap_or(1.0);
        if ratio != 1.0 {
            rescaled += 1;
        }
        let (_, new0) = knots[knots.len() - 1];
        knots.push((tc1, new0 + ((tc1 - tc0) as f64 * ratio).round() as Ticks));
    }
    if rescaled == 0 {
        return Ok(0);
    }

    list.retime(|tc| map_through(&knots, tc))?;
    debug!("Rescaled {} of {} audio segments", rescaled, knots.len() - 1);
    Ok(rescaled)
}

/// Actual over expected seek distance for the first track playing the same
/// clip at both ends of a segment
fn segment_ratio(start: &FrameEvent, end: &FrameEvent, seconds: f64) -> Option<f64> {
    if seconds <= 0.0 {
        return None;
    }
    start.audio.iter().find_map(|a| {
        let b = end.audio_for(a.track)?;
        if b.clip != a.clip || a.clip < 0 || a.velocity == 0.0 {
            return None;
        }
        let expected = a.velocity * seconds;
        let actual = b.seek - a.seek;
        Some(actual / expected)
    })
}

fn map_through(knots: &[(Ticks, Ticks)], tc: Ticks) -> Ticks {
    let Some(&(first_old, _)) = knots.first() else {
        return tc;
    };
    if tc <= first_old {
        return tc;
    }
    match knots.windows(2).find(|w| tc <= w[1].0) {
        Some(w) => {
            let ((o0, n0), (o1, n1)) = (w[0], w[1]);
            if o1 == o0 {
                return n1;
            }
            n0 + ((tc - o0) as f64 * (n1 - n0) as f64 / (o1 - o0) as f64).round() as Ticks
        }
        None => {
            let (old, new) = knots[knots.len() - 1];
            tc + (new - old)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_common::events::{AudioEntry, EventKind};
    use cutline_common::timing::TICKS_PER_SECOND;

    #[test]
    fn test_smoothing_fixes_jitter_in_linear_run() {
        let mut list = EventList::new(None);
        let step = TICKS_PER_SECOND / 25;
        for (i, n) in [1, 2, 2, 4, 5].iter().enumerate() {
            list.push(i as Ticks * step, EventKind::Frame(FrameEvent::single(1, *n)))
                .unwrap();
        }

        let changed = smooth_frames(&mut list, &QuantizeConfig::default());
        let numbers: Vec<i64> = list.frames().map(|(_, _, f)| f.track(0).frame).collect();
        assert_eq!(changed, 1);
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_smoothing_leaves_jumps_and_capture_alone() {
        let mut list = EventList::new(None);
        let step = TICKS_PER_SECOND / 25;
        for (i, n) in [1, 40, 2].iter().enumerate() {
            list.push(i as Ticks * step, EventKind::Frame(FrameEvent::single(1, *n)))
                .unwrap();
        }
        assert_eq!(smooth_frames(&mut list, &QuantizeConfig::default()), 0);

        let mut capture = EventList::new(None);
        for (i, n) in [1, 1, 3].iter().enumerate() {
            capture
                .push(i as Ticks * step, EventKind::Frame(FrameEvent::single(9, *n)))
                .unwrap();
        }
        let config = QuantizeConfig {
            scrap_clip: Some(9),
            ..QuantizeConfig::default()
        };
        assert_eq!(smooth_frames(&mut capture, &config), 0);
    }

    #[test]
    fn test_rescale_stretches_slow_segment() {
        let mut list = EventList::new(None);
        list.push(
            0,
            EventKind::Frame(FrameEvent::single(1, 1).with_audio(AudioEntry::new(0, 5, 0.0, 1.0))),
        )
        .unwrap();
        // Audio covered 1.05 s while the timeline says 1.0 s
        list.push(
            TICKS_PER_SECOND,
            EventKind::Frame(FrameEvent::single(1, 2).with_audio(AudioEntry::new(0, 5, 1.05, 1.0))),
        )
        .unwrap();
        list.push(2 * TICKS_PER_SECOND, EventKind::Frame(FrameEvent::single(1, 3)))
            .unwrap();

        let rescaled = rescale(&mut list, &QuantizeConfig::default()).unwrap();
        assert_eq!(rescaled, 1);
        let tcs: Vec<Ticks> = list.iter().map(|(_, e)| e.timecode).collect();
        assert_eq!(tcs, vec![0, 105_000_000, 205_000_000]);
    }

    #[test]
    fn test_rescale_ignores_implausible_ratio_and_fixed_lists() {
        let build = |fps| {
            let mut list = EventList::new(fps);
            list.push(
                0,
                EventKind::Frame(FrameEvent::single(1, 1).with_audio(AudioEntry::new(0, 5, 0.0, 1.0))),
            )
            .unwrap();
            list.push(
                TICKS_PER_SECOND,
                EventKind::Frame(FrameEvent::single(1, 2).with_audio(AudioEntry::new(0, 5, 3.0, 1.0))),
            )
            .unwrap();
            list
        };

        let mut noisy = build(None);
        assert_eq!(rescale(&mut noisy, &QuantizeConfig::default()).unwrap(), 0);
        assert_eq!(noisy, build(None));

        let mut fixed = build(Some(25.0));
        assert_eq!(rescale(&mut fixed, &QuantizeConfig::default()).unwrap(), 0);
    }
}
