use tracing::debug;

use crate::analysis::types::{BeatIndex, Track};
use crate::graph::similarity::NeighborTable;
use crate::overlay::types::{OffsetBounds, OverlaySettings, OverlayTarget};

/// Offsets that land on bar and phrase lengths
pub const MUSICAL_INTERVALS: [i64; 9] = [4, 8, 12, 16, 20, 24, 32, 48, 64];

/// Candidates taken from each neighbor list
const CANDIDATES_PER_LIST: usize = 6;

/// Smooth per-beat offsets into piecewise-constant runs
///
/// For every beat a preferred offset is taken from a running median, snapped
/// toward a musical interval, and clamped to `bounds`. The candidate closest to
/// it wins, with hysteresis holding the previous offset until it has dwelled
/// long enough. Returns the number of beats whose target changed.
pub fn smooth_mapping(
    targets: &mut [OverlayTarget],
    track: &Track,
    neighbors: &NeighborTable,
    settings: &OverlaySettings,
    bounds: OffsetBounds,
) -> usize {
    let n = targets.len();
    if n == 0 {
        return 0;
    }

    let window = settings.smoothing_window().max(3);
    let min_dwell = settings.dwell_beats.max(2);
    let mut deltas: Vec<i64> = targets.iter().enumerate().map(|(i, t)| t.offset_from(i)).collect();

    let mut last_delta: Option<i64> = None;
    let mut run_len = 0usize;
    let mut changed = 0;

    for i in 0..n {
        let preferred = preferred_offset(&deltas, i, window, settings.musicality, bounds);

        let Some((best_target, best_delta)) = pick_candidate(i, targets[i].other, preferred, track, neighbors, bounds)
        else {
            continue;
        };

        match last_delta {
            Some(last) if last != best_delta => {
                if run_len < effective_dwell(i, track, min_dwell) {
                    let projected = i as i64 + last;
                    if (0..n as i64).contains(&projected) {
                        changed += assign(&mut targets[i], projected as BeatIndex);
                        deltas[i] = last;
                        run_len += 1;
                        continue;
                    }
                }
                run_len = 1;
            }
            _ => run_len += 1,
        }

        changed += assign(&mut targets[i], best_target);
        deltas[i] = best_delta;
        last_delta = Some(best_delta);
    }

    debug!("Smoothing changed {} of {} targets (window {}, dwell {})", changed, n, window, min_dwell);
    changed
}

fn assign(target: &mut OverlayTarget, other: BeatIndex) -> usize {
    if target.other == other {
        0
    } else {
        target.other = other;
        1
    }
}

/// Median of the offsets in a centered window
fn running_median(deltas: &[i64], index: usize, window: usize) -> i64 {
    let half = window / 2;
    let start = index.saturating_sub(half);
    let end = (index + half).min(deltas.len() - 1);
    let mut values: Vec<i64> = deltas[start..=end].to_vec();
    values.sort_unstable();
    values[values.len() / 2]
}

/// Median offset snapped toward a musical interval and clamped into bounds
fn preferred_offset(deltas: &[i64], index: usize, window: usize, musicality: f64, bounds: OffsetBounds) -> i64 {
    let mut preferred = running_median(deltas, index, window);

    let magnitude = preferred.abs();
    let (closest, distance) = MUSICAL_INTERVALS
        .iter()
        .map(|&m| (m, (magnitude - m).abs()))
        .fold((MUSICAL_INTERVALS[0], i64::MAX), |best, cur| if cur.1 < best.1 { cur } else { best });

    let tolerance = (musicality / 100.0 * 10.0).floor() as i64;
    if distance <= tolerance {
        let strength = musicality / 100.0;
        let snapped = if preferred >= 0 { closest } else { -closest };
        preferred = (preferred as f64 * (1.0 - strength) + snapped as f64 * strength).round() as i64;
    }

    let sign = if preferred >= 0 { 1 } else { -1 };
    let magnitude = (preferred.unsigned_abs() as usize).clamp(bounds.min, bounds.max);
    sign * magnitude as i64
}

/// Lowest-cost same-section candidate within bounds
fn pick_candidate(
    index: BeatIndex,
    current: BeatIndex,
    preferred: i64,
    track: &Track,
    neighbors: &NeighborTable,
    bounds: OffsetBounds,
) -> Option<(BeatIndex, i64)> {
    let candidates = std::iter::once((current, 0.0))
        .chain(neighbors.good_neighbors(index).iter().take(CANDIDATES_PER_LIST).map(|n| (n.index, n.distance)))
        .chain(neighbors.neighbors(index).iter().take(CANDIDATES_PER_LIST).map(|n| (n.index, n.distance)));

    let mut best: Option<(BeatIndex, i64, f64)> = None;
    for (candidate, distance) in candidates {
        let delta = candidate as i64 - index as i64;
        if !bounds.contains_offset(delta) {
            continue;
        }
        if track.section_of(candidate) != track.section_of(index) {
            continue;
        }

        let cost = (delta - preferred).abs() as f64 + distance / 200.0
            - size_reward(delta, bounds)
            - musical_bonus(delta);
        if best.map_or(true, |(_, _, c)| cost < c) {
            best = Some((candidate, delta, cost));
        }
    }
    best.map(|(candidate, delta, _)| (candidate, delta))
}

fn size_reward(delta: i64, bounds: OffsetBounds) -> f64 {
    (delta.abs() as f64 / bounds.max.max(1) as f64 * 0.3).min(0.35)
}

fn musical_bonus(delta: i64) -> f64 {
    let magnitude = delta.abs();
    if magnitude % 16 == 0 {
        0.35
    } else if magnitude % 8 == 0 {
        0.25
    } else if magnitude % 4 == 0 {
        0.15
    } else {
        0.0
    }
}

/// Dwell relaxes at section ends and 8-beat phrase starts, tightens elsewhere
fn effective_dwell(index: BeatIndex, track: &Track, min_dwell: usize) -> usize {
    let next = (index + 1).min(track.len().saturating_sub(1));
    let at_section_boundary = track.section_of(next) != track.section_of(index);
    let at_phrase_boundary = index % 8 == 0;

    if at_section_boundary || at_phrase_boundary {
        ((min_dwell as f64 * 0.6).floor() as usize).max(2)
    } else {
        (min_dwell as f64 * 1.2).ceil() as usize
    }
}
