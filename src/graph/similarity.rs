use tracing::debug;

use crate::analysis::types::{BaseAlignment, Beat, BeatIndex, FeatureSegment, Track};
use crate::config::SimilarityConfig;

/// Candidate beat with its weighted distance from the source beat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: BeatIndex,
    pub distance: f64,
}

/// Ranked candidates of one beat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeatNeighbors {
    /// All kept candidates, ascending by distance
    pub neighbors: Vec<Neighbor>,

    /// Quality-filtered subset, ascending by distance
    pub good_neighbors: Vec<Neighbor>,
}

impl BeatNeighbors {
    pub fn best(&self) -> Option<&Neighbor> {
        self.neighbors.first()
    }
}

/// Neighbor lists for every beat of a track, indexed by beat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborTable {
    entries: Vec<BeatNeighbors>,
}

impl NeighborTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: BeatIndex) -> Option<&BeatNeighbors> {
        self.entries.get(index)
    }

    pub fn neighbors(&self, index: BeatIndex) -> &[Neighbor] {
        self.entries.get(index).map(|e| e.neighbors.as_slice()).unwrap_or(&[])
    }

    pub fn good_neighbors(&self, index: BeatIndex) -> &[Neighbor] {
        self.entries.get(index).map(|e| e.good_neighbors.as_slice()).unwrap_or(&[])
    }

    pub fn best(&self, index: BeatIndex) -> Option<&Neighbor> {
        self.entries.get(index).and_then(|e| e.best())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BeatNeighbors> {
        self.entries.iter()
    }
}

/// Nearest-neighbor index over the beats of one track
///
/// Distance is a weighted sum over aligned sub-segment pairs plus structural
/// penalties (section change, time distance, index proximity). Externally
/// supplied loop candidates are merged in as comparable distances.
pub struct SimilarityIndex {
    config: SimilarityConfig,
}

impl SimilarityIndex {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Compute neighbor lists for every beat
    ///
    /// `advanced` raises the per-beat cap from `max_neighbors` to
    /// `max_neighbors_advanced`.
    pub fn build(&self, track: &Track, advanced: bool) -> NeighborTable {
        if !track.is_usable() {
            return NeighborTable::default();
        }

        let cap = if advanced {
            self.config.max_neighbors_advanced
        } else {
            self.config.max_neighbors
        };

        let entries = track
            .beats
            .iter()
            .map(|beat| self.neighbors_for(track, beat, cap))
            .collect();

        debug!("Computed neighbors for {} beats (cap {})", track.len(), cap);
        NeighborTable { entries }
    }

    /// Ranked candidates for a single beat
    pub fn neighbors_for(&self, track: &Track, q1: &Beat, cap: usize) -> BeatNeighbors {
        let mut neighbors: Vec<Neighbor> = track
            .beats
            .iter()
            .filter(|q2| q2.index != q1.index)
            .filter_map(|q2| {
                let distance = self.beat_distance(track, q1, q2);
                (distance > 0.0).then_some(Neighbor { index: q2.index, distance })
            })
            .collect();

        if let Some(edges) = track.loop_candidates.get(&q1.index) {
            for edge in edges {
                if edge.target >= track.len() || edge.target == q1.index {
                    continue;
                }
                let edge_distance = self.edge_distance(edge.similarity, self.config.loop_edge_base, self.config.loop_edge_scale);
                match neighbors.iter_mut().find(|n| n.index == edge.target) {
                    Some(existing) => existing.distance = existing.distance.min(edge_distance),
                    None => neighbors.push(Neighbor { index: edge.target, distance: edge_distance }),
                }
            }
        }

        // Stable sort: equal distances keep beat order
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(cap);

        let good_neighbors = self.good_subset(track, q1, &neighbors);
        BeatNeighbors { neighbors, good_neighbors }
    }

    /// Full distance between two beats, including structural penalties
    pub fn beat_distance(&self, track: &Track, q1: &Beat, q2: &Beat) -> f64 {
        let cfg = &self.config;

        let sum: f64 = q1
            .features
            .iter()
            .enumerate()
            .map(|(j, seg1)| match q2.features.get(j) {
                Some(seg2) => self.segment_distance(seg1, seg2),
                None => cfg.missing_segment_distance,
            })
            .sum();
        let mut base = sum / q1.features.len() as f64;
        if !base.is_finite() {
            base = cfg.sentinel_distance;
        }

        let section_penalty = if q1.section != q2.section { cfg.section_penalty } else { 0.0 };

        let time_penalty = if track.duration > 0.0 {
            (q1.start - q2.start).abs() / track.duration * cfg.time_penalty_scale
        } else {
            0.0
        };

        let index_gap = q1.index.abs_diff(q2.index) as f64;
        let flow_penalty = (cfg.flow_window as f64 - index_gap).max(0.0) * cfg.flow_penalty;

        let total = base + section_penalty + time_penalty + flow_penalty;
        if total.is_finite() { total } else { cfg.sentinel_distance }
    }

    /// Weighted distance between two aligned sub-segments
    pub fn segment_distance(&self, seg1: &FeatureSegment, seg2: &FeatureSegment) -> f64 {
        let w = &self.config.weights;
        euclidean_distance(&seg1.timbre, &seg2.timbre) * w.timbre
            + euclidean_distance(&seg1.pitches, &seg2.pitches) * w.pitch
            + (seg1.loudness_start - seg2.loudness_start).abs() * w.loudness_start
            + (seg1.loudness_max - seg2.loudness_max).abs() * w.loudness_max
            + (seg1.duration - seg2.duration).abs() * w.duration
            + (seg1.confidence - seg2.confidence).abs() * w.confidence
    }

    /// Similarity in [-1, 1] → distance comparable with feature distances
    fn edge_distance(&self, similarity: f64, base: f64, scale: f64) -> f64 {
        let normalized = ((similarity + 1.0) / 2.0).clamp(0.0, 1.0);
        (base + (1.0 - normalized) * scale).max(self.config.loop_edge_floor)
    }

    fn good_subset(&self, track: &Track, q1: &Beat, neighbors: &[Neighbor]) -> Vec<Neighbor> {
        let Some(best) = neighbors.first() else {
            return Vec::new();
        };

        let threshold = best.distance + self.config.good_neighbor_margin;
        let filtered: Vec<Neighbor> = neighbors
            .iter()
            .filter(|n| n.distance <= threshold && track.section_of(n.index) == Some(q1.section))
            .copied()
            .collect();

        if filtered.is_empty() {
            neighbors.iter().take(self.config.good_neighbor_fallback).copied().collect()
        } else {
            filtered
        }
    }

    /// Fold a base alignment's loop candidates and transitions into the lists
    pub fn augment_with_alignment(
        &self,
        track: &Track,
        table: &mut NeighborTable,
        alignment: &BaseAlignment,
    ) {
        if alignment.loop_candidates.is_empty() && alignment.transitions.is_empty() {
            return;
        }
        if table.len() != track.len() {
            return;
        }

        let n = track.len() as i64;
        let threshold = alignment.threshold();
        let valid = |idx: Option<i64>| idx.filter(|i| *i >= 0 && *i < n).map(|i| i as BeatIndex);
        let mut added = 0usize;

        for edge in &alignment.loop_candidates {
            let (Some(src), Some(dst)) = (valid(edge.source), valid(edge.target)) else {
                continue;
            };
            let sim = edge.similarity.unwrap_or(0.0);
            if sim < threshold * 0.9 {
                continue;
            }
            let neighbor = Neighbor { index: dst, distance: self.edge_distance(sim, 12.0, 120.0) };
            let entry = &mut table.entries[src];
            entry.neighbors.push(neighbor);
            entry.good_neighbors.push(neighbor);
            added += 1;
        }

        for transition in &alignment.transitions {
            let (Some(src), Some(dst)) = (valid(transition.source), valid(transition.target)) else {
                continue;
            };
            if src == dst {
                continue;
            }
            let sim = transition.similarity.unwrap_or(0.0);
            let neighbor = Neighbor { index: dst, distance: self.edge_distance(sim, 12.0, 120.0) };
            let entry = &mut table.entries[src];
            entry.neighbors.push(neighbor);
            if !entry.good_neighbors.iter().any(|g| g.index == dst) {
                entry.good_neighbors.push(neighbor);
            }
            added += 1;
        }

        for entry in &mut table.entries {
            dedup_sorted(&mut entry.neighbors, self.config.augmented_max_neighbors);
            dedup_sorted(&mut entry.good_neighbors, self.config.augmented_max_good_neighbors);
        }

        debug!("Augmented neighbor lists with {} alignment edges", added);
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new(SimilarityConfig::default())
    }
}

/// Sort ascending, keep the closest entry per target, cap the length
fn dedup_sorted(list: &mut Vec<Neighbor>, cap: usize) {
    list.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    let mut seen = std::collections::HashSet::new();
    list.retain(|n| seen.insert(n.index));
    list.truncate(cap);
}

/// Euclidean distance; missing components count as zero
fn euclidean_distance(v1: &[f64], v2: &[f64]) -> f64 {
    let len = v1.len().max(v2.len());
    (0..len)
        .map(|i| {
            let delta = v2.get(i).copied().unwrap_or(0.0) - v1.get(i).copied().unwrap_or(0.0);
            delta * delta
        })
        .sum::<f64>()
        .sqrt()
}
