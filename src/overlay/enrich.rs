use rand::Rng;
use tracing::debug;

use crate::analysis::types::Track;
use crate::config::OverlayConfig;
use crate::graph::similarity::NeighborTable;
use crate::overlay::types::{OffsetBounds, OverlaySettings, OverlayTarget};

const MIN_SPACING: usize = 10;

/// Gain for a run beat that was silent before
const FRESH_RUN_GAIN: f64 = 0.35;

/// Retarget short runs in the middle of the track onto a constant offset
///
/// Starting at `enrich_start_frac` of the track, every `spacing + jitter`
/// beats the first same-section neighbor within distance and offset bounds
/// becomes the target of a run of consecutive beats. Returns the number of
/// runs applied.
pub fn enrich_connections<R: Rng>(
    targets: &mut [OverlayTarget],
    track: &Track,
    neighbors: &NeighborTable,
    settings: &OverlaySettings,
    bounds: OffsetBounds,
    config: &OverlayConfig,
    rng: &mut R,
) -> usize {
    let n = targets.len();
    let start = (n as f64 * config.enrich_start_frac).floor() as usize;
    let end = ((n as f64 * config.enrich_end_frac).floor() as usize).min(n);
    if end <= start + 4 {
        return 0;
    }

    let spacing = settings.enrich_spacing().max(MIN_SPACING);
    let max_run = settings.enrich_run_length();
    let jitter = settings.enrich_jitter();
    let mut runs = 0;

    let mut i = start;
    while i < end {
        let candidates = match neighbors.good_neighbors(i) {
            [] => neighbors.neighbors(i),
            good => good,
        };
        let run = max_run.min(end - i);

        let chosen = candidates.iter().find_map(|cand| {
            if cand.distance > config.enrich_max_distance {
                return None;
            }
            if track.section_of(cand.index) != track.section_of(i) {
                return None;
            }
            let offset = cand.index as i64 - i as i64;
            if !bounds.contains_offset(offset) {
                return None;
            }
            let first = i as i64 + offset;
            let last = (i + run - 1) as i64 + offset;
            (first >= 0 && last < n as i64).then_some(offset)
        });

        if let Some(offset) = chosen {
            for (j, target) in targets.iter_mut().enumerate().skip(i).take(run) {
                target.other = (j as i64 + offset) as usize;
                target.gain = if target.gain > 0.0 {
                    target.gain.clamp(0.25, 0.9)
                } else {
                    FRESH_RUN_GAIN
                };
            }
            runs += 1;
        }

        i += spacing + rng.gen_range(0..=jitter);
    }

    debug!("Enrichment applied {} runs over beats {}..{}", runs, start, end);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::similarity::SimilarityIndex;
    use crate::settings::schema::GroupKind;
    use crate::test_support::periodic_track;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_runs_share_one_offset() {
        let track = periodic_track(256, 1, 8);
        let neighbors = SimilarityIndex::default().build(&track, true);
        let settings = OverlaySettings::defaults(GroupKind::CanonOverlay);
        let bounds = OffsetBounds { min: 8, max: 64 };
        let mut targets: Vec<OverlayTarget> = (0..track.len()).map(OverlayTarget::silent).collect();
        let mut rng = SmallRng::seed_from_u64(7);

        let runs = enrich_connections(
            &mut targets,
            &track,
            &neighbors,
            &settings,
            bounds,
            &OverlayConfig::default(),
            &mut rng,
        );
        assert!(runs > 0);

        let moved: Vec<usize> = (0..track.len()).filter(|&i| targets[i].other != i).collect();
        assert!(!moved.is_empty());
        for &i in &moved {
            assert!(i >= 56 && i < 225, "beat {} outside the enrichment window", i);
            assert!(bounds.contains_offset(targets[i].offset_from(i)));
            assert_eq!(targets[i].gain, 0.35);
        }
    }

    #[test]
    fn test_short_track_is_skipped() {
        let track = periodic_track(8, 1, 2);
        let neighbors = SimilarityIndex::default().build(&track, false);
        let settings = OverlaySettings::defaults(GroupKind::CanonOverlay);
        let mut targets: Vec<OverlayTarget> = (0..8).map(OverlayTarget::silent).collect();
        let mut rng = SmallRng::seed_from_u64(1);

        let runs = enrich_connections(
            &mut targets,
            &track,
            &neighbors,
            &settings,
            OffsetBounds { min: 1, max: 7 },
            &OverlayConfig::default(),
            &mut rng,
        );
        assert_eq!(runs, 0);
    }
}
