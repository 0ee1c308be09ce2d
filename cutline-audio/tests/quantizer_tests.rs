//! Quantizer integration tests
//!
//! Uses a recorded (free-running, ~30 fps with jitter) event list loaded from
//! JSON and quantizes it onto a 25 fps grid.

use cutline_audio::config::QuantizeConfig;
use cutline_audio::timeline::{FrameSource, Quantizer};
use cutline_common::events::{AudioEntry, EventKind, EventList, EventType, FilterInstanceId};
use cutline_common::timing::{grid_tick, ticks_to_seconds, Ticks};

const RECORDED: &str = include_str!("fixtures/recorded_30fps.json");

fn recorded() -> EventList {
    EventList::from_json_str(RECORDED).expect("fixture parses")
}

fn count(list: &EventList, kind: EventType) -> usize {
    list.iter().filter(|(_, e)| e.event_type() == kind).count()
}

fn audio_changes(list: &EventList, track: i32) -> Vec<(Ticks, AudioEntry)> {
    list.frames()
        .filter_map(|(_, tc, f)| f.audio_for(track).map(|a| (tc, *a)))
        .collect()
}

#[test]
fn test_fixture_loads_as_free_running() {
    let list = recorded();
    assert_eq!(list.fps(), None);
    assert_eq!(list.frames().count(), 15);
    assert_eq!(list.len(), 22);
}

#[test]
fn test_every_tick_has_exactly_one_frame() {
    let q = Quantizer::new(&QuantizeConfig::default());
    let (out, report) = q.quantize_with_report(&recorded(), 25.0).unwrap();

    assert_eq!(out.fps(), Some(25.0));
    assert_eq!(report.ticks, 13);
    let tcs: Vec<Ticks> = out.frames().map(|(_, tc, _)| tc).collect();
    let grid: Vec<Ticks> = (0..13).map(|i| grid_tick(i, 25.0)).collect();
    assert_eq!(tcs, grid);

    // Every timecode is on the grid, not just the frames
    for (_, event) in out.iter() {
        let index = (ticks_to_seconds(event.timecode) * 25.0).round() as i64;
        assert_eq!(event.timecode, grid_tick(index, 25.0));
    }

    // Frame numbers only move forward through the recording
    let numbers: Vec<i64> = out.frames().map(|(_, _, f)| f.track(0).frame).collect();
    assert_eq!(numbers[0], 1);
    assert!(numbers.windows(2).all(|w| w[0] <= w[1]), "{:?}", numbers);
    assert!(report
        .sources
        .iter()
        .any(|s| matches!(s, FrameSource::Interpolated { .. })));
}

#[test]
fn test_non_frame_events_survive_in_tick_order() {
    let q = Quantizer::new(&QuantizeConfig::default());
    let out = q.quantize(&recorded(), 25.0).unwrap();

    assert_eq!(count(&out, EventType::FilterInit), 1);
    assert_eq!(count(&out, EventType::ParamChange), 2);
    assert_eq!(count(&out, EventType::FilterDeinit), 1);
    assert_eq!(count(&out, EventType::Marker), 1);
    assert_eq!(count(&out, EventType::FilterMap), 2);

    let head: Vec<EventType> = out.events()[..4].iter().map(|e| e.event_type()).collect();
    assert_eq!(
        head,
        vec![
            EventType::FilterInit,
            EventType::ParamChange,
            EventType::FilterMap,
            EventType::Frame
        ]
    );

    // Deinit lands after the frame of its tick, followed by the emptied map
    let deinit = out
        .iter()
        .position(|(_, e)| e.event_type() == EventType::FilterDeinit)
        .unwrap();
    let events = out.events();
    assert_eq!(events[deinit - 1].event_type(), EventType::Frame);
    assert_eq!(events[deinit - 1].timecode, events[deinit].timecode);
    match &events[deinit + 1].kind {
        EventKind::FilterMap(map) => assert!(map.active.is_empty()),
        other => panic!("expected filter map, got {:?}", other),
    }
    match &events[2].kind {
        EventKind::FilterMap(map) => assert_eq!(map.active, vec![FilterInstanceId(7)]),
        other => panic!("expected filter map, got {:?}", other),
    }
}

#[test]
fn test_requantizing_output_is_identity() {
    let q = Quantizer::new(&QuantizeConfig::default());
    let once = q.quantize(&recorded(), 25.0).unwrap();
    let (twice, report) = q.quantize_with_report(&once, 25.0).unwrap();
    assert_eq!(once, twice);
    assert_eq!(report.adjustments, 0);
}

#[test]
fn test_audio_changes_stay_in_sync_after_snapping() {
    let q = Quantizer::new(&QuantizeConfig::default());
    let input = recorded();
    let (out, report) = q.quantize_with_report(&input, 25.0).unwrap();

    let changes = audio_changes(&out, 0);
    let ticks: Vec<Ticks> = changes.iter().map(|(tc, _)| *tc).collect();
    assert_eq!(ticks, vec![0, grid_tick(5, 25.0), grid_tick(9, 25.0)]);

    // Seeks and the last velocity are untouched
    let recorded_changes = audio_changes(&input, 0);
    for ((_, got), (_, want)) in changes.iter().zip(&recorded_changes) {
        assert_eq!(got.seek, want.seek);
        assert_eq!(got.clip, want.clip);
    }
    assert_eq!(changes[2].1.velocity, -1.0);

    // Each change reaches the next one's seek at the snapped switch time
    for pair in changes.windows(2) {
        let ((t0, a), (t1, b)) = (pair[0], pair[1]);
        let reached = a.seek + a.velocity * ticks_to_seconds(t1 - t0);
        assert!(
            (reached - b.seek).abs() < 1e-9,
            "reached {} wanted {}",
            reached,
            b.seek
        );
    }
    assert_eq!(report.adjustments, 2);
    assert_eq!(report.capped, 0);
    assert!(report.max_residual < 1e-9);
}

#[test]
fn test_tight_limits_bound_the_drift() {
    let config = QuantizeConfig {
        max_velocity_change: 0.01,
        max_seek_error: 0.005,
        ..QuantizeConfig::default()
    };
    let (out, report) = Quantizer::new(&config)
        .quantize_with_report(&recorded(), 25.0)
        .unwrap();

    let changes = audio_changes(&out, 0);
    let recorded_changes = audio_changes(&recorded(), 0);
    for ((_, got), (_, want)) in changes.iter().zip(&recorded_changes) {
        let relative = ((got.velocity - want.velocity) / want.velocity).abs();
        assert!(relative <= 0.01 + 1e-12, "velocity moved {}", relative);
    }

    // The 2.0 stretch wanted 0.012 s and was held to a 1% nudge
    assert_eq!(report.adjustments, 2);
    assert_eq!(report.capped, 1);
    assert!((report.max_residual - (0.533 - (0.201 + 2.02 * 0.16))).abs() < 1e-9);
}
