use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::analysis::types::{BaseAlignment, BeatIndex, Track};
use crate::config::OverlayConfig;
use crate::graph::similarity::NeighborTable;
use crate::overlay::bounds::ensure_offset_bounds;
use crate::overlay::enrich::enrich_connections;
use crate::overlay::smoothing::smooth_mapping;
use crate::overlay::types::{
    CanonSegmentInfo, MapperPhase, OffsetBounds, OverlaySettings, OverlayTarget, SegmentLabel,
};
use crate::overlay::volume::{normalized_volumes, sanitize_gains};

const GAIN_BASE_DEFAULT: f64 = 0.40;
const GAIN_BASE_PRIMARY: f64 = 0.46;
const GAIN_BASE_FALLBACK: f64 = 0.34;
const GAIN_SIMILARITY_SCALE: f64 = 0.45;

const FOLD_MATCH_GAIN: f64 = 0.9;
const FOLD_FALLBACK_GAIN: f64 = 0.15;
const FOLD_SEAM_GAIN: f64 = 0.5;

/// How the base mapping of the current track was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseOutcome {
    /// Precomputed alignment applied
    Aligned,
    /// Section-majority offsets derived from neighbors
    Folded,
    /// Unusable track: every beat maps to itself, silent
    Degraded,
}

/// Base assignments restored before every recompute
#[derive(Debug, Clone, PartialEq)]
pub struct BaseSnapshot {
    targets: Vec<OverlayTarget>,
}

impl BaseSnapshot {
    pub fn targets(&self) -> &[OverlayTarget] {
        &self.targets
    }
}

/// Builds and maintains the per-beat overlay mapping of one track
pub struct OverlayMapper {
    config: OverlayConfig,
    phase: MapperPhase,
    outcome: Option<BaseOutcome>,
    base: Option<BaseSnapshot>,
    targets: Vec<OverlayTarget>,
    volumes: Vec<f64>,
    segments: Vec<Option<CanonSegmentInfo>>,
    alignment_loop_edges: Vec<(BeatIndex, BeatIndex, f64)>,
}

impl OverlayMapper {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            phase: MapperPhase::Uninitialized,
            outcome: None,
            base: None,
            targets: Vec::new(),
            volumes: Vec::new(),
            segments: Vec::new(),
            alignment_loop_edges: Vec::new(),
        }
    }

    pub fn phase(&self) -> MapperPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<BaseOutcome> {
        self.outcome
    }

    pub fn targets(&self) -> &[OverlayTarget] {
        &self.targets
    }

    pub fn target(&self, index: BeatIndex) -> Option<OverlayTarget> {
        self.targets.get(index).copied()
    }

    pub fn volume(&self, index: BeatIndex) -> Option<f64> {
        self.volumes.get(index).copied()
    }

    pub fn segment_info(&self, index: BeatIndex) -> Option<&CanonSegmentInfo> {
        self.segments.get(index).and_then(|s| s.as_ref())
    }

    pub fn base(&self) -> Option<&BaseSnapshot> {
        self.base.as_ref()
    }

    /// Loop edges captured from the applied alignment, both directions
    pub fn alignment_loop_edges(&self) -> &[(BeatIndex, BeatIndex, f64)] {
        &self.alignment_loop_edges
    }

    /// Drop all per-track state
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Establish and snapshot the base mapping for a freshly loaded track
    pub fn initialize(&mut self, track: &Track, neighbors: &NeighborTable) -> BaseOutcome {
        self.reset();

        let outcome = if !track.is_usable() {
            self.targets = (0..track.len()).map(OverlayTarget::silent).collect();
            BaseOutcome::Degraded
        } else {
            let aligned = track
                .base_alignment
                .as_ref()
                .map_or(false, |alignment| self.apply_base_alignment(track, alignment));
            if aligned {
                BaseOutcome::Aligned
            } else {
                if track.base_alignment.is_some() {
                    warn!("Base alignment does not match the track, using section fold");
                }
                self.fold_by_section(track, neighbors);
                BaseOutcome::Folded
            }
        };

        sanitize_gains(&mut self.targets);
        self.snapshot_base();
        self.outcome = Some(outcome);
        self.phase = MapperPhase::BaseAligned;
        info!("Overlay base mapping ready: {:?} ({} beats)", outcome, track.len());
        outcome
    }

    /// Pair every beat with its aligned partner; false on a shape mismatch
    pub fn apply_base_alignment(&mut self, track: &Track, alignment: &BaseAlignment) -> bool {
        let n = track.len();
        if n == 0 || alignment.pairs.len() != n {
            debug!("Alignment has {} pairs for {} beats", alignment.pairs.len(), n);
            return false;
        }

        let mut segment_of: Vec<Option<usize>> = vec![None; n];
        for (si, seg) in alignment.segments.iter().enumerate() {
            if !seg.start.is_finite() || !seg.end.is_finite() {
                continue;
            }
            let start = seg.start.floor().max(0.0) as usize;
            let end = (seg.end.ceil().max(0.0) as usize).min(n);
            for slot in segment_of.iter_mut().take(end).skip(start) {
                *slot = Some(si);
            }
        }

        let threshold = alignment.threshold();
        let coverage = alignment.coverage();
        let mut targets = Vec::with_capacity(n);
        let mut segments = Vec::with_capacity(n);

        for i in 0..n {
            let paired = alignment.pairs[i].filter(|p| *p >= 0 && (*p as usize) < n);
            let (other, sim) = match paired {
                Some(p) => (
                    p as BeatIndex,
                    alignment.pair_similarity.get(i).copied().filter(|s| s.is_finite()).unwrap_or(0.0),
                ),
                None => ((i as i64 + alignment.offset).rem_euclid(n as i64) as BeatIndex, 0.0),
            };
            let sim_norm = ((sim + 1.0) / 2.0).clamp(0.0, 1.0);

            let segment = segment_of[i].map(|si| &alignment.segments[si]);
            let label = segment.map(|s| SegmentLabel::parse(s.label.as_deref()));

            let mut gain_base = match label {
                Some(SegmentLabel::Primary) => GAIN_BASE_PRIMARY,
                Some(SegmentLabel::Fallback) => GAIN_BASE_FALLBACK,
                _ => GAIN_BASE_DEFAULT,
            };
            if let Some(phase) = segment.and_then(|s| s.phase_alignment).filter(|p| p.is_finite()) {
                if phase < 0.65 {
                    gain_base *= 0.9;
                } else if phase > 0.88 {
                    gain_base += 0.05;
                }
            }
            if coverage.map_or(false, |c| c < 0.75) {
                gain_base *= 0.92;
            }

            let gain = if sim < threshold {
                0.0
            } else {
                (gain_base + sim_norm * GAIN_SIMILARITY_SCALE).clamp(0.25, 1.0)
            };

            targets.push(OverlayTarget { other, gain });
            segments.push(Some(CanonSegmentInfo {
                segment: segment_of[i],
                label,
                offset: (other + n - i) % n,
                phase_alignment: segment.and_then(|s| s.phase_alignment),
                mean_similarity: segment.and_then(|s| s.mean_similarity),
                similarity: sim,
            }));
        }

        self.targets = targets;
        self.segments = segments;
        self.alignment_loop_edges = alignment.loop_edges(n);
        debug!(
            "Applied base alignment (threshold {:.2}, {} loop edges captured)",
            threshold,
            self.alignment_loop_edges.len()
        );
        true
    }

    /// Per-section majority offset derived from each beat's best neighbor
    pub fn fold_by_section(&mut self, track: &Track, neighbors: &NeighborTable) {
        let n = track.len();
        let mut targets: Vec<OverlayTarget> = (0..n).map(OverlayTarget::silent).collect();

        let best_in_section = |i: BeatIndex| {
            neighbors
                .best(i)
                .filter(|best| track.section_of(best.index) == track.section_of(i))
                .map(|best| best.index)
        };

        for section in 0..track.section_count.max(1) {
            let members: Vec<BeatIndex> = (0..n).filter(|&i| track.section_of(i) == Some(section)).collect();

            // Counts in first-seen order so ties resolve to the earliest delta
            let mut order: Vec<i64> = Vec::new();
            let mut counts: HashMap<i64, usize> = HashMap::new();
            for &i in &members {
                if let Some(best) = best_in_section(i) {
                    let delta = i as i64 - best as i64;
                    let count = counts.entry(delta).or_insert(0);
                    if *count == 0 {
                        order.push(delta);
                    }
                    *count += 1;
                }
            }
            let mut best_delta: Option<(i64, usize)> = None;
            for delta in order {
                let count = counts[&delta];
                if best_delta.map_or(true, |(_, c)| count > c) {
                    best_delta = Some((delta, count));
                }
            }

            for &i in &members {
                let fallback = if i + 1 < n { i + 1 } else { i };
                let fallback_gain = if fallback == i { 0.0 } else { FOLD_FALLBACK_GAIN };

                let folded = match (best_delta, best_in_section(i)) {
                    (Some((delta, _)), Some(_)) => {
                        let t = i as i64 - delta;
                        (0..n as i64)
                            .contains(&t)
                            .then_some(t as BeatIndex)
                            .filter(|&t| track.sections_adjacent(i, t))
                    }
                    _ => None,
                };

                targets[i] = match folded {
                    Some(t) if t != fallback => OverlayTarget { other: t, gain: FOLD_MATCH_GAIN },
                    _ => OverlayTarget { other: fallback, gain: fallback_gain },
                };
            }
        }

        // Seams between non-consecutive targets are softened on both sides
        for i in 1..n {
            if targets[i - 1].other + 1 != targets[i].other {
                targets[i - 1].gain = FOLD_SEAM_GAIN;
                targets[i].gain = FOLD_SEAM_GAIN;
            }
        }

        self.targets = targets;
        self.segments = vec![None; n];
        self.alignment_loop_edges.clear();
        debug!("Folded overlay mapping over {} sections", track.section_count);
    }

    /// Record the current targets as the base
    pub fn snapshot_base(&mut self) {
        self.base = Some(BaseSnapshot { targets: self.targets.clone() });
    }

    /// Reset targets to the base snapshot; false before initialization
    pub fn restore_base(&mut self) -> bool {
        match &self.base {
            Some(base) => {
                self.targets.clone_from(&base.targets);
                true
            }
            None => false,
        }
    }

    /// Re-derive the mapping from the base
    ///
    /// `advanced` carries the overlay group settings when the group is
    /// enabled; without it only volumes are normalized. The result depends on
    /// the track, the neighbor table and the settings alone.
    pub fn regenerate(&mut self, track: &Track, neighbors: &NeighborTable, advanced: Option<&OverlaySettings>) {
        if !self.restore_base() {
            debug!("Overlay regenerate before initialization ignored");
            return;
        }

        match advanced {
            Some(settings) if track.is_usable() && track.len() > 1 => {
                let bounds = OffsetBounds::resolve(settings, track.len());
                let mut rng = SmallRng::seed_from_u64(enrichment_seed(track.len(), settings));

                ensure_offset_bounds(&mut self.targets, track, neighbors, bounds);
                enrich_connections(&mut self.targets, track, neighbors, settings, bounds, &self.config, &mut rng);
                self.phase = MapperPhase::Enriched;

                smooth_mapping(&mut self.targets, track, neighbors, settings, bounds);
                ensure_offset_bounds(&mut self.targets, track, neighbors, bounds);
                self.phase = MapperPhase::Smoothed;

                self.normalize(track);
                self.phase = MapperPhase::Normalized;
                debug!("Overlay regenerated with offsets [{}, {}]", bounds.min, bounds.max);
            }
            _ => {
                self.normalize(track);
                self.phase = MapperPhase::NormalizedOnly;
            }
        }
    }

    /// Map every beat to itself with zero gain, keeping the base
    pub fn silence(&mut self) {
        for (i, target) in self.targets.iter_mut().enumerate() {
            *target = OverlayTarget::silent(i);
        }
    }

    fn normalize(&mut self, track: &Track) {
        sanitize_gains(&mut self.targets);
        self.volumes = normalized_volumes(track, self.config.volume_median_window);
    }
}

impl Default for OverlayMapper {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

/// Seed for enrichment jitter: same track length and settings, same runs
fn enrichment_seed(beat_count: usize, settings: &OverlaySettings) -> u64 {
    let mut hasher = DefaultHasher::new();
    beat_count.hash(&mut hasher);
    settings.musicality.to_bits().hash(&mut hasher);
    settings.min_offset_beats.hash(&mut hasher);
    settings.max_offset_beats.hash(&mut hasher);
    settings.dwell_beats.hash(&mut hasher);
    settings.density.hash(&mut hasher);
    settings.jump_bubble_beats.hash(&mut hasher);
    settings.variation.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::AlignmentSegment;
    use crate::analysis::AnalysisIngest;
    use crate::graph::similarity::SimilarityIndex;
    use crate::settings::schema::GroupKind;
    use crate::test_support::{init_logging, periodic_analysis, periodic_track};

    fn overlay_settings(min: f64, max: f64) -> OverlaySettings {
        let mut values = GroupKind::CanonOverlay.defaults();
        values.insert("minOffsetBeats".to_string(), min);
        values.insert("maxOffsetBeats".to_string(), max);
        OverlaySettings::from_values(GroupKind::CanonOverlay, &values)
    }

    fn shifted_alignment(n: usize, shift: usize, similarity: f64) -> BaseAlignment {
        BaseAlignment {
            pairs: (0..n).map(|i| Some(((i + shift) % n) as i64)).collect(),
            pair_similarity: vec![similarity; n],
            similarity_threshold: Some(0.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_alignment_gains() {
        let track = periodic_track(32, 1, 8);
        let mut alignment = shifted_alignment(32, 8, 0.8);
        alignment.pair_similarity[3] = 0.2;
        alignment.pairs[5] = None;
        alignment.offset = 4;
        alignment.segments = vec![
            AlignmentSegment { start: 0.0, end: 16.0, label: Some("primary".into()), phase_alignment: Some(0.9), ..Default::default() },
            AlignmentSegment { start: 16.0, end: 32.0, label: Some("fallback".into()), ..Default::default() },
        ];

        let mut mapper = OverlayMapper::default();
        assert!(mapper.apply_base_alignment(&track, &alignment));

        // primary 0.46 + phase bonus 0.05 + 0.9 * 0.45
        assert!((mapper.target(0).unwrap().gain - 0.915).abs() < 1e-9);
        assert_eq!(mapper.target(0).unwrap().other, 8);
        // below threshold
        assert_eq!(mapper.target(3).unwrap().gain, 0.0);
        // invalid pair falls back to the global offset with zero similarity
        assert_eq!(mapper.target(5).unwrap(), OverlayTarget { other: 9, gain: 0.0 });
        // fallback segment: 0.34 + 0.405
        assert!((mapper.target(20).unwrap().gain - 0.745).abs() < 1e-9);
        assert_eq!(mapper.segment_info(20).unwrap().label, Some(SegmentLabel::Fallback));
    }

    #[test]
    fn test_low_coverage_dampens_gain() {
        let track = periodic_track(16, 1, 8);
        let mut alignment = shifted_alignment(16, 4, 1.0);
        alignment.coverage_ratio = Some(0.5);

        let mut mapper = OverlayMapper::default();
        assert!(mapper.apply_base_alignment(&track, &alignment));
        // (0.40 * 0.92) + 0.45
        assert!((mapper.target(0).unwrap().gain - 0.818).abs() < 1e-9);
    }

    #[test]
    fn test_short_alignment_falls_back_to_fold() {
        init_logging();
        let mut doc = periodic_analysis(64, 4, 8);
        doc.base_alignment = Some(shifted_alignment(40, 8, 0.9));
        let track = AnalysisIngest::new().ingest(doc);
        let neighbors = SimilarityIndex::default().build(&track, false);

        let mut mapper = OverlayMapper::default();
        let alignment = track.base_alignment.clone().unwrap();
        assert!(!mapper.apply_base_alignment(&track, &alignment));

        assert_eq!(mapper.initialize(&track, &neighbors), BaseOutcome::Folded);
        for (i, t) in mapper.targets().iter().enumerate() {
            assert!(t.other < track.len());
            assert!(track.sections_adjacent(i, t.other), "beat {} -> {}", i, t.other);
            assert!(t.gain <= 0.9 && t.gain >= 0.0);
        }
    }

    #[test]
    fn test_degraded_track_maps_to_self() {
        let mut doc = periodic_analysis(8, 1, 4);
        doc.beats[2].duration = f64::INFINITY;
        let track = AnalysisIngest::new().ingest(doc);
        let neighbors = SimilarityIndex::default().build(&track, false);

        let mut mapper = OverlayMapper::default();
        assert_eq!(mapper.initialize(&track, &neighbors), BaseOutcome::Degraded);
        mapper.regenerate(&track, &neighbors, Some(&overlay_settings(8.0, 32.0)));
        for (i, t) in mapper.targets().iter().enumerate() {
            assert_eq!(*t, OverlayTarget::silent(i));
        }
    }

    #[test]
    fn test_regenerate_is_idempotent() {
        let track = periodic_track(128, 4, 8);
        let neighbors = SimilarityIndex::default().build(&track, true);
        let settings = overlay_settings(8.0, 32.0);

        let mut mapper = OverlayMapper::default();
        mapper.initialize(&track, &neighbors);
        mapper.regenerate(&track, &neighbors, Some(&settings));
        let first = mapper.targets().to_vec();

        // A different pass in between must not leak into the next one
        mapper.regenerate(&track, &neighbors, Some(&overlay_settings(4.0, 16.0)));
        mapper.regenerate(&track, &neighbors, Some(&settings));
        assert_eq!(mapper.targets(), first.as_slice());
        assert_eq!(mapper.phase(), MapperPhase::Normalized);
    }

    #[test]
    fn test_advanced_bounds_hold() {
        let track = periodic_track(128, 4, 8);
        let neighbors = SimilarityIndex::default().build(&track, true);

        let mut mapper = OverlayMapper::default();
        mapper.initialize(&track, &neighbors);
        mapper.regenerate(&track, &neighbors, Some(&overlay_settings(8.0, 32.0)));
        for (i, t) in mapper.targets().iter().enumerate() {
            let magnitude = i.abs_diff(t.other);
            assert!((8..=32).contains(&magnitude), "beat {} offset {}", i, magnitude);
            assert!((0.0..=1.0).contains(&t.gain));
        }
    }

    #[test]
    fn test_disabled_group_restores_base() {
        let track = periodic_track(64, 2, 8);
        let neighbors = SimilarityIndex::default().build(&track, false);

        let mut mapper = OverlayMapper::default();
        mapper.initialize(&track, &neighbors);
        let base = mapper.base().unwrap().targets().to_vec();

        mapper.regenerate(&track, &neighbors, Some(&overlay_settings(8.0, 32.0)));
        mapper.regenerate(&track, &neighbors, None);
        assert_eq!(mapper.targets(), base.as_slice());
        assert_eq!(mapper.phase(), MapperPhase::NormalizedOnly);
        assert!(mapper.volume(0).is_some());
    }

    #[test]
    fn test_regenerate_before_initialize_is_noop() {
        let track = periodic_track(16, 1, 4);
        let mut mapper = OverlayMapper::default();
        mapper.regenerate(&track, &NeighborTable::default(), None);
        assert_eq!(mapper.phase(), MapperPhase::Uninitialized);
        assert!(mapper.targets().is_empty());
    }
}
