use tracing::debug;

use crate::analysis::types::{BeatIndex, Track};
use crate::graph::similarity::NeighborTable;
use crate::overlay::types::{OffsetBounds, OverlayTarget};

const GOOD_NEIGHBOR_WEIGHT: f64 = 0.0;
const NEIGHBOR_WEIGHT: f64 = 0.25;
const SCAN_DISTANCE: f64 = 180.0;
const DISTANCE_SCALE: f64 = 220.0;
const CROSS_SECTION_PENALTY: f64 = 0.6;

/// Repair every beat whose offset magnitude falls outside `bounds`
///
/// Candidates are searched in good neighbors, then all neighbors, then by a
/// forward/backward scan in half-minimum steps. Only same or adjacent section
/// candidates qualify. A beat with no qualifying candidate keeps its mapping.
/// Returns the number of repaired beats.
pub fn ensure_offset_bounds(
    targets: &mut [OverlayTarget],
    track: &Track,
    neighbors: &NeighborTable,
    bounds: OffsetBounds,
) -> usize {
    let mut repaired = 0;
    let mut stranded = 0;

    for (index, target) in targets.iter_mut().enumerate() {
        if bounds.contains_offset(target.offset_from(index)) {
            continue;
        }

        match find_replacement(index, track, neighbors, bounds) {
            Some(other) => {
                target.other = other;
                let gain = if target.gain > 0.0 { target.gain } else { 0.45 };
                target.gain = gain.clamp(0.35, 0.9);
                repaired += 1;
            }
            None => stranded += 1,
        }
    }

    if repaired > 0 || stranded > 0 {
        debug!(
            "Offset bounds [{}, {}]: repaired {} beats, {} left unchanged",
            bounds.min, bounds.max, repaired, stranded
        );
    }
    repaired
}

fn find_replacement(
    index: BeatIndex,
    track: &Track,
    neighbors: &NeighborTable,
    bounds: OffsetBounds,
) -> Option<BeatIndex> {
    let mut search = CandidateSearch::new(index, track, bounds);

    for n in neighbors.good_neighbors(index) {
        search.consider(n.index, n.distance, GOOD_NEIGHBOR_WEIGHT);
    }
    if search.best.is_none() {
        for n in neighbors.neighbors(index) {
            search.consider(n.index, n.distance, NEIGHBOR_WEIGHT);
        }
    }
    if search.best.is_none() {
        let step = ((bounds.min as f64 / 2.0).round() as usize).max(1);
        let mut offset = bounds.min;
        while offset <= bounds.max {
            let weight = 1.0 + offset as f64 / 64.0;
            if let Some(forward) = index.checked_add(offset).filter(|f| *f < track.len()) {
                search.consider(forward, SCAN_DISTANCE, weight);
            }
            if let Some(backward) = index.checked_sub(offset) {
                search.consider(backward, SCAN_DISTANCE, weight);
            }
            if search.best.is_some() {
                break;
            }
            offset += step;
        }
    }

    search.best.map(|(candidate, _)| candidate)
}

/// Lowest-penalty candidate seen so far; first encountered wins ties
struct CandidateSearch<'a> {
    index: BeatIndex,
    track: &'a Track,
    bounds: OffsetBounds,
    best: Option<(BeatIndex, f64)>,
}

impl<'a> CandidateSearch<'a> {
    fn new(index: BeatIndex, track: &'a Track, bounds: OffsetBounds) -> Self {
        Self { index, track, bounds, best: None }
    }

    fn consider(&mut self, candidate: BeatIndex, distance: f64, weight: f64) {
        if candidate == self.index || !self.bounds.contains(candidate.abs_diff(self.index)) {
            return;
        }
        if !self.track.sections_adjacent(self.index, candidate) {
            return;
        }

        let mut penalty = weight + distance / DISTANCE_SCALE;
        if self.track.section_of(candidate) != self.track.section_of(self.index) {
            penalty += CROSS_SECTION_PENALTY;
        }
        if !penalty.is_finite() {
            return;
        }
        if self.best.map_or(true, |(_, best)| penalty < best) {
            self.best = Some((candidate, penalty));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::periodic_track;

    #[test]
    fn test_out_of_bounds_beats_are_repaired() {
        let track = periodic_track(128, 4, 8);
        let neighbors = NeighborTable::default();
        let bounds = OffsetBounds { min: 8, max: 32 };
        let mut targets: Vec<OverlayTarget> = (0..track.len()).map(OverlayTarget::silent).collect();

        let repaired = ensure_offset_bounds(&mut targets, &track, &neighbors, bounds);
        assert_eq!(repaired, track.len());
        for (i, t) in targets.iter().enumerate() {
            assert!(bounds.contains_offset(t.offset_from(i)), "beat {} -> {}", i, t.other);
            assert!(track.sections_adjacent(i, t.other));
            assert_eq!(t.gain, 0.45);
        }
    }

    #[test]
    fn test_scan_prefers_same_section() {
        let track = periodic_track(64, 4, 8);
        let bounds = OffsetBounds { min: 8, max: 12 };
        // Beat 20 sits in section 1 (16..32): +8 stays inside, -8 would leave it
        let mut targets: Vec<OverlayTarget> =
            (0..21).map(|i| OverlayTarget { other: i + 8, gain: 0.5 }).collect();
        targets[20] = OverlayTarget::silent(20);

        ensure_offset_bounds(&mut targets, &track, &NeighborTable::default(), bounds);
        assert_eq!(targets[20].other, 28);
    }

    #[test]
    fn test_in_bounds_mapping_untouched() {
        let track = periodic_track(32, 1, 8);
        let bounds = OffsetBounds { min: 4, max: 16 };
        let mut targets: Vec<OverlayTarget> =
            (0..32).map(|i| OverlayTarget { other: (i + 8) % 32, gain: 0.7 }).collect();
        let before = targets.clone();

        // (i + 8) % 32 wraps for the tail beats, which then need a repair
        let repaired = ensure_offset_bounds(&mut targets, &track, &NeighborTable::default(), bounds);
        assert_eq!(repaired, 8);
        assert_eq!(&targets[..24], &before[..24]);
    }

    #[test]
    fn test_impossible_bounds_keep_mapping() {
        let track = periodic_track(6, 1, 2);
        let bounds = OffsetBounds { min: 10, max: 20 };
        let mut targets: Vec<OverlayTarget> = (0..6).map(OverlayTarget::silent).collect();
        assert_eq!(ensure_offset_bounds(&mut targets, &track, &NeighborTable::default(), bounds), 0);
        assert!(targets.iter().enumerate().all(|(i, t)| t.other == i));
    }
}
