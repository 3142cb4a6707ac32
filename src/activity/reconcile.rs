//! Builds the request-scoped interval view of a window: persisted intervals,
//! the unsaved live tail, zero-step gap filler and propagated modes.
//!
//! Everything here is pure; the service layer does the reading.

use chrono::{DateTime, Utc};

use crate::db::{IntervalSource, ModeId, StepInterval};
use crate::error::{ActivityError, ActivityResult};

use super::types::{LiveSnapshot, NeighbouringModes, PropagationPolicy, Window};

/// Reconcile `persisted` (ordered by start, as the store returns them) with
/// the live counter for `window`.
///
/// The result covers `window` exactly: the first interval starts at
/// `window.start`, each interval starts where the previous one ends, and the
/// last one ends at `window.end`. An interval belongs to the window its
/// `end_time` settles in; counts are never split.
///
/// `neighbours` are the known modes the store holds outside the queried
/// range. Together with `persisted` intervals past `window.end` and the live
/// counter they let unknown modes resolve the same way whatever the window
/// end is.
pub fn reconcile_intervals(
    window: Window,
    persisted: Vec<StepInterval>,
    live: Option<&LiveSnapshot>,
    neighbours: NeighbouringModes,
    policy: PropagationPolicy,
) -> ActivityResult<Vec<StepInterval>> {
    check_ordering(&persisted)?;

    let next_known = first_known_after(&window, &persisted, live, neighbours.after);

    let mut sequence = Vec::with_capacity(persisted.len() * 2 + 2);
    let mut cursor = window.start;

    for mut interval in persisted
        .into_iter()
        .filter(|interval| window.settles(interval.end_time))
    {
        // Only the first owned interval can reach back past the window start.
        if interval.start_time < window.start {
            interval.start_time = window.start;
        }
        if interval.start_time > cursor {
            sequence.push(StepInterval::gap(cursor, interval.start_time));
        }
        cursor = interval.end_time;
        sequence.push(interval);
    }

    if let Some(tail) = live.and_then(|snapshot| live_tail(&window, cursor, snapshot)) {
        cursor = tail.end_time;
        sequence.push(tail);
    }

    if cursor < window.end {
        sequence.push(StepInterval::gap(cursor, window.end));
    }

    let neighbours = NeighbouringModes {
        before: neighbours.before,
        after: next_known,
    };
    propagate_modes(&mut sequence, neighbours, policy);
    Ok(sequence)
}

/// First known mode recorded after `window.end`, in time order: stored
/// intervals the window does not own, then the store's own lookahead, then
/// the live counter if it was sampled after the window.
fn first_known_after(
    window: &Window,
    persisted: &[StepInterval],
    live: Option<&LiveSnapshot>,
    stored_after: Option<ModeId>,
) -> Option<ModeId> {
    persisted
        .iter()
        .filter(|interval| interval.end_time > window.end)
        .find_map(|interval| interval.walking_mode)
        .or(stored_after)
        .or_else(|| {
            live.filter(|snapshot| snapshot.sampled_at > window.end)
                .and_then(|snapshot| snapshot.active_mode)
        })
}

/// The unsaved steps as an interval starting where the saved data stops.
/// A flush that lands between the store read and the counter read can leave
/// `start` past the sampling time; the tail then shrinks to zero length but
/// keeps its count.
fn live_tail(
    window: &Window,
    start: DateTime<Utc>,
    snapshot: &LiveSnapshot,
) -> Option<StepInterval> {
    if !window.settles(snapshot.sampled_at) {
        return None;
    }

    Some(StepInterval {
        id: None,
        start_time: start,
        end_time: snapshot.sampled_at.max(start),
        step_count: snapshot.steps_since_last_save,
        walking_mode: snapshot.active_mode,
        source: IntervalSource::LiveTail,
    })
}

fn check_ordering(intervals: &[StepInterval]) -> ActivityResult<()> {
    if let Some(bad) = intervals.iter().find(|i| i.start_time > i.end_time) {
        return Err(ActivityError::OverlappingIntervals {
            detail: format!(
                "interval {:?} ends ({}) before it starts ({})",
                bad.id, bad.end_time, bad.start_time
            ),
        });
    }

    for pair in intervals.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        // The earlier end is authoritative; the later start may not precede it.
        if later.start_time < earlier.end_time {
            return Err(ActivityError::OverlappingIntervals {
                detail: format!(
                    "interval {:?} [{}, {}) overlaps interval {:?} [{}, {})",
                    earlier.id,
                    earlier.start_time,
                    earlier.end_time,
                    later.id,
                    later.start_time,
                    later.end_time
                ),
            });
        }
    }

    Ok(())
}

/// Give intervals without a mode the mode of a known neighbour. The search
/// continues past either end of `intervals` into `neighbours`.
pub fn propagate_modes(
    intervals: &mut [StepInterval],
    neighbours: NeighbouringModes,
    policy: PropagationPolicy,
) {
    match policy {
        PropagationPolicy::Disabled => {}
        PropagationPolicy::Backward => {
            fill_from_next(intervals, neighbours.after);
            fill_from_previous(intervals, neighbours.before);
        }
        PropagationPolicy::Forward => {
            fill_from_previous(intervals, neighbours.before);
            fill_from_next(intervals, neighbours.after);
        }
    }
}

fn fill_from_next(intervals: &mut [StepInterval], after: Option<ModeId>) {
    let mut next = after;
    for interval in intervals.iter_mut().rev() {
        match interval.walking_mode {
            Some(mode) => next = Some(mode),
            None => interval.walking_mode = next,
        }
    }
}

fn fill_from_previous(intervals: &mut [StepInterval], before: Option<ModeId>) {
    let mut previous = before;
    for interval in intervals.iter_mut() {
        match interval.walking_mode {
            Some(mode) => previous = Some(mode),
            None => interval.walking_mode = previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModeId;
    use chrono::{Duration, TimeZone};

    const WALKING: ModeId = ModeId(1);
    const RUNNING: ModeId = ModeId(2);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    fn stored(start: i64, end: i64, steps: u64, mode: Option<ModeId>) -> StepInterval {
        StepInterval {
            id: Some(start),
            ..StepInterval::new(at(start), at(end), steps, mode)
        }
    }

    fn window(start: i64, end: i64) -> Window {
        Window::new(at(start), at(end)).unwrap()
    }

    fn live(steps: u64, mode: ModeId, sampled: i64) -> LiveSnapshot {
        LiveSnapshot {
            steps_since_last_save: steps,
            active_mode: Some(mode),
            sampled_at: at(sampled),
            last_saved_at: None,
            flush_generation: 0,
        }
    }

    fn assert_covers(window: Window, sequence: &[StepInterval]) {
        if window.start == window.end {
            assert!(sequence.is_empty());
            return;
        }
        assert_eq!(sequence.first().unwrap().start_time, window.start);
        assert_eq!(sequence.last().unwrap().end_time, window.end);
        for pair in sequence.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time, "gap or overlap in {sequence:?}");
        }
        for interval in sequence {
            assert!(interval.start_time <= interval.end_time);
        }
    }

    #[test]
    fn single_stored_interval_fills_its_window() {
        let sequence = reconcile_intervals(
            window(0, 60),
            vec![stored(0, 60, 500, Some(WALKING))],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence[0].step_count, 500);
        assert_eq!(sequence[0].source, IntervalSource::Persisted);
    }

    #[test]
    fn live_steps_become_a_tail_from_window_start() {
        let w = window(0, 25);
        let sequence = reconcile_intervals(
            w,
            Vec::new(),
            Some(&live(120, RUNNING, 25)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_eq!(sequence.len(), 1);
        let tail = &sequence[0];
        assert_eq!((tail.start_time, tail.end_time), (at(0), at(25)));
        assert_eq!(tail.step_count, 120);
        assert_eq!(tail.walking_mode, Some(RUNNING));
        assert_eq!(tail.source, IntervalSource::LiveTail);
    }

    #[test]
    fn tail_starts_at_last_saved_end() {
        let w = window(0, 50);
        let sequence = reconcile_intervals(
            w,
            vec![stored(0, 30, 200, Some(WALKING))],
            Some(&live(40, WALKING, 50)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_covers(w, &sequence);
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[1].start_time, at(30));
        assert_eq!(sequence[1].step_count, 40);
    }

    #[test]
    fn tail_sampled_outside_window_is_ignored() {
        let w = window(0, 60);
        let sequence = reconcile_intervals(
            w,
            vec![stored(0, 30, 10, Some(WALKING))],
            Some(&live(99, WALKING, 90)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_covers(w, &sequence);
        assert!(sequence.iter().all(|i| i.source != IntervalSource::LiveTail));
        assert_eq!(sequence.iter().map(|i| i.step_count).sum::<u64>(), 10);
    }

    #[test]
    fn tail_racing_a_flush_keeps_its_count_at_zero_length() {
        let w = window(0, 60);
        let sequence = reconcile_intervals(
            w,
            vec![stored(0, 45, 300, Some(WALKING))],
            Some(&live(15, WALKING, 40)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_covers(w, &sequence);
        let tail = sequence
            .iter()
            .find(|i| i.source == IntervalSource::LiveTail)
            .unwrap();
        assert_eq!((tail.start_time, tail.end_time), (at(45), at(45)));
        assert_eq!(tail.step_count, 15);
    }

    #[test]
    fn straddling_intervals_settle_in_the_window_of_their_end() {
        let w = window(30, 90);
        let sequence = reconcile_intervals(
            w,
            vec![
                stored(0, 45, 100, Some(WALKING)),
                stored(45, 80, 200, Some(WALKING)),
                stored(80, 120, 400, Some(WALKING)),
            ],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_covers(w, &sequence);
        let steps: Vec<u64> = sequence.iter().map(|i| i.step_count).collect();
        assert_eq!(steps, vec![100, 200, 0]);
        assert_eq!(sequence[0].start_time, at(30));
        assert_eq!(sequence[2].source, IntervalSource::Gap);
    }

    #[test]
    fn gaps_are_filled_and_take_a_neighbouring_mode() {
        let w = window(0, 120);
        let sequence = reconcile_intervals(
            w,
            vec![stored(10, 30, 50, Some(WALKING)), stored(60, 90, 70, Some(RUNNING))],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();

        assert_covers(w, &sequence);
        let modes: Vec<Option<ModeId>> = sequence.iter().map(|i| i.walking_mode).collect();
        // gap, walk, gap, run, gap
        assert_eq!(
            modes,
            vec![Some(WALKING), Some(WALKING), Some(RUNNING), Some(RUNNING), Some(RUNNING)]
        );
    }

    #[test]
    fn forward_policy_extends_the_previous_mode() {
        let mut sequence = vec![
            stored(0, 10, 5, Some(WALKING)),
            stored(10, 20, 5, None),
            stored(20, 30, 5, Some(RUNNING)),
        ];
        propagate_modes(&mut sequence, NeighbouringModes::default(), PropagationPolicy::Forward);
        assert_eq!(sequence[1].walking_mode, Some(WALKING));

        let mut sequence = vec![stored(0, 10, 5, None), stored(10, 20, 5, Some(RUNNING))];
        propagate_modes(&mut sequence, NeighbouringModes::default(), PropagationPolicy::Forward);
        assert_eq!(sequence[0].walking_mode, Some(RUNNING));
    }

    #[test]
    fn unknown_mode_between_equal_modes_resolves_to_them() {
        for policy in [PropagationPolicy::Backward, PropagationPolicy::Forward] {
            let sequence = reconcile_intervals(
                window(0, 30),
                vec![
                    stored(0, 10, 5, Some(RUNNING)),
                    stored(10, 20, 5, None),
                    stored(20, 30, 5, Some(RUNNING)),
                ],
                None,
                NeighbouringModes::default(),
                policy,
            )
            .unwrap();
            assert!(sequence.iter().all(|i| i.walking_mode == Some(RUNNING)));
        }
    }

    #[test]
    fn disabled_policy_keeps_unknown_modes() {
        let sequence = reconcile_intervals(
            window(0, 30),
            vec![stored(0, 10, 5, Some(RUNNING)), stored(10, 30, 5, None)],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Disabled,
        )
        .unwrap();
        assert_eq!(sequence[1].walking_mode, None);
    }

    #[test]
    fn differing_known_modes_are_not_coalesced() {
        let sequence = reconcile_intervals(
            window(0, 30),
            vec![
                stored(0, 10, 5, Some(WALKING)),
                stored(10, 20, 6, Some(WALKING)),
                stored(20, 30, 7, Some(RUNNING)),
            ],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert_eq!(sequence.len(), 3);
    }

    #[test]
    fn overlapping_store_data_is_reported() {
        let err = reconcile_intervals(
            window(0, 60),
            vec![stored(0, 30, 5, None), stored(20, 40, 5, None)],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap_err();
        assert!(matches!(err, ActivityError::OverlappingIntervals { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn shared_boundary_is_not_an_overlap() {
        let w = window(0, 60);
        let sequence = reconcile_intervals(
            w,
            vec![stored(0, 30, 5, None), stored(30, 60, 5, None)],
            None,
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert_covers(w, &sequence);
    }

    #[test]
    fn empty_window_yields_empty_sequence() {
        let sequence = reconcile_intervals(
            window(10, 10),
            vec![stored(0, 10, 5, None)],
            Some(&live(3, WALKING, 10)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert!(sequence.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let persisted = vec![stored(5, 15, 40, None), stored(20, 35, 60, Some(RUNNING))];
        let snapshot = live(12, WALKING, 50);
        let first = reconcile_intervals(
            window(0, 50),
            persisted.clone(),
            Some(&snapshot),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        let second = reconcile_intervals(
            window(0, 50),
            persisted,
            Some(&snapshot),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn generated_interval_sets_are_always_covered() {
        // Small LCG so the cases are reproducible without extra crates.
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        for _ in 0..200 {
            let mut persisted = Vec::new();
            let mut cursor = next(30) as i64;
            for _ in 0..next(8) {
                let start = cursor + next(20) as i64;
                let end = start + next(25) as i64;
                let mode = match next(3) {
                    0 => None,
                    1 => Some(WALKING),
                    _ => Some(RUNNING),
                };
                persisted.push(stored(start, end, next(500), mode));
                cursor = end;
            }

            let start = next(60) as i64;
            let end = start + next(240) as i64;
            let w = window(start, end);
            let snapshot = (next(2) == 0).then(|| live(next(100), WALKING, end));

            let sequence = reconcile_intervals(
                w,
                persisted,
                snapshot.as_ref(),
                NeighbouringModes::default(),
                PropagationPolicy::Backward,
            )
            .unwrap();
            assert_covers(w, &sequence);
        }
    }

    #[test]
    fn unknown_mode_resolves_the_same_as_the_window_end_moves() {
        let persisted = vec![
            stored(0, 10, 100, Some(RUNNING)),
            stored(10, 20, 100, None),
            stored(20, 30, 5, Some(WALKING)),
        ];

        for policy in [PropagationPolicy::Backward, PropagationPolicy::Forward] {
            let short = reconcile_intervals(
                window(0, 20),
                persisted.clone(),
                None,
                NeighbouringModes::default(),
                policy,
            )
            .unwrap();
            let long = reconcile_intervals(
                window(0, 30),
                persisted.clone(),
                None,
                NeighbouringModes::default(),
                policy,
            )
            .unwrap();
            assert_eq!(short[1].walking_mode, long[1].walking_mode, "{policy:?}");
        }
    }

    #[test]
    fn neighbouring_modes_outside_the_window_are_used() {
        let sequence = reconcile_intervals(
            window(0, 20),
            vec![stored(0, 10, 40, None), stored(10, 20, 60, None)],
            None,
            NeighbouringModes {
                before: Some(WALKING),
                after: Some(RUNNING),
            },
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert!(sequence.iter().all(|i| i.walking_mode == Some(RUNNING)));

        let sequence = reconcile_intervals(
            window(0, 20),
            vec![stored(0, 10, 40, None), stored(10, 20, 60, None)],
            None,
            NeighbouringModes {
                before: Some(WALKING),
                after: Some(RUNNING),
            },
            PropagationPolicy::Forward,
        )
        .unwrap();
        assert!(sequence.iter().all(|i| i.walking_mode == Some(WALKING)));
    }

    #[test]
    fn live_counter_after_the_window_counts_as_the_next_mode() {
        let sequence = reconcile_intervals(
            window(0, 20),
            vec![stored(0, 10, 5, Some(WALKING)), stored(10, 20, 50, None)],
            Some(&live(12, RUNNING, 45)),
            NeighbouringModes::default(),
            PropagationPolicy::Backward,
        )
        .unwrap();
        assert_eq!(sequence[1].walking_mode, Some(RUNNING));
    }
}
