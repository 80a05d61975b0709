use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::analysis::types::{BeatIndex, LoopCandidateSource, LoopDirection, Track};
use crate::config::LoopConfig;
use crate::graph::similarity::NeighborTable;
use crate::settings::schema::{sanitize, GroupKind, SettingsMap};

/// Distance at which a fallback loop's similarity reaches zero
const FALLBACK_DISTANCE_SCALE: f64 = 240.0;

/// Validated loop-jump parameters of a loop group
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub musicality: f64,
    pub min_loop_beats: usize,
    pub max_sequential_beats: usize,
    pub loop_threshold: f64,
    pub section_bias: f64,
    pub jump_variance: f64,
}

impl LoopSettings {
    /// Sanitize raw group values (missing fields take the group defaults)
    pub fn from_values(group: GroupKind, values: &SettingsMap) -> Self {
        let clean = sanitize(group, values);
        let get = |key: &str| clean.get(key).copied().unwrap_or(0.0);
        Self {
            musicality: get("musicality"),
            min_loop_beats: get("minLoopBeats") as usize,
            max_sequential_beats: get("maxSequentialBeats") as usize,
            loop_threshold: get("loopThreshold"),
            section_bias: get("sectionBias"),
            jump_variance: get("jumpVariance"),
        }
    }

    pub fn defaults(group: GroupKind) -> Self {
        Self::from_values(group, &group.defaults())
    }
}

/// Directed jump between two beats
#[derive(Debug, Clone, PartialEq)]
pub struct LoopEdge {
    pub source: BeatIndex,
    pub target: BeatIndex,
    pub similarity: f64,
    /// Signed `target - source`
    pub span: i64,
    pub direction: LoopDirection,
    pub section_match: bool,
}

/// Where the edges of a loop graph came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEdgeOrigin {
    Candidates,
    Alignment,
    Neighbors,
    /// Only section-anchor bridges
    Bridges,
    Empty,
}

/// Jump graph the playback driver walks in jukebox and eternal modes
#[derive(Debug, Clone, PartialEq)]
pub struct LoopGraph {
    edges: Vec<LoopEdge>,
    by_source: BTreeMap<BeatIndex, Vec<usize>>,
    origin: LoopEdgeOrigin,
}

impl Default for LoopGraph {
    fn default() -> Self {
        Self { edges: Vec::new(), by_source: BTreeMap::new(), origin: LoopEdgeOrigin::Empty }
    }
}

impl LoopGraph {
    fn from_edges(edges: Vec<LoopEdge>, origin: LoopEdgeOrigin) -> Self {
        let mut by_source: BTreeMap<BeatIndex, Vec<usize>> = BTreeMap::new();
        for (i, edge) in edges.iter().enumerate() {
            by_source.entry(edge.source).or_default().push(i);
        }
        Self { edges, by_source, origin }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn origin(&self) -> LoopEdgeOrigin {
        self.origin
    }

    pub fn all_edges(&self) -> &[LoopEdge] {
        &self.edges
    }

    /// Outgoing edges of one beat, in insertion order
    pub fn edges(&self, source: BeatIndex) -> Vec<&LoopEdge> {
        self.by_source
            .get(&source)
            .map(|ids| ids.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Strongest `limit` edges, descending by similarity
    pub fn visualization_edges(&self, limit: usize) -> Vec<&LoopEdge> {
        let mut ranked: Vec<&LoopEdge> = self.edges.iter().collect();
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        ranked.truncate(limit);
        ranked
    }
}

/// Derives the directed loop graph from candidates, alignment and neighbors
pub struct LoopGraphBuilder {
    config: LoopConfig,
}

impl LoopGraphBuilder {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn visualization_limit(&self) -> usize {
        self.config.visualization_edge_limit
    }

    /// Build the graph for a track
    ///
    /// Candidate edges win over alignment edges, which win over edges derived
    /// from good neighbors. Section-anchor bridges are appended in every case.
    pub fn build(&self, track: &Track, neighbors: &NeighborTable, settings: &LoopSettings) -> LoopGraph {
        if track.is_empty() {
            return LoopGraph::default();
        }

        let mut origin = LoopEdgeOrigin::Candidates;
        let mut edges = self.candidate_edges(track, settings);

        if edges.is_empty() && track.loop_candidate_source != Some(LoopCandidateSource::Alignment) {
            edges = self.alignment_edges(track, settings);
            origin = LoopEdgeOrigin::Alignment;
        }
        if edges.is_empty() {
            edges = self.fallback_edges(track, neighbors, settings);
            origin = LoopEdgeOrigin::Neighbors;
        }
        if edges.is_empty() {
            origin = LoopEdgeOrigin::Bridges;
        }

        edges.extend(self.bridge_edges(track, settings));
        if edges.is_empty() {
            origin = LoopEdgeOrigin::Empty;
        }

        info!(
            "Loop graph: {} edges ({:?}, min {} beats, threshold {:.2})",
            edges.len(),
            origin,
            settings.min_loop_beats,
            settings.loop_threshold
        );
        LoopGraph::from_edges(edges, origin)
    }

    fn make_edge(track: &Track, source: BeatIndex, target: BeatIndex, similarity: f64) -> LoopEdge {
        LoopEdge {
            source,
            target,
            similarity,
            span: target as i64 - source as i64,
            direction: LoopDirection::between(source, target),
            section_match: track.section_of(source) == track.section_of(target),
        }
    }

    fn candidate_edges(&self, track: &Track, settings: &LoopSettings) -> Vec<LoopEdge> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for (&source, candidates) in &track.loop_candidates {
            for cand in candidates {
                if cand.similarity < settings.loop_threshold
                    || cand.span.unsigned_abs() < settings.min_loop_beats as u64
                    || !seen.insert((source, cand.target))
                {
                    continue;
                }
                edges.push(LoopEdge {
                    source,
                    target: cand.target,
                    similarity: cand.similarity,
                    span: cand.span,
                    direction: cand.direction,
                    section_match: cand
                        .section_match
                        .unwrap_or_else(|| track.section_of(source) == track.section_of(cand.target)),
                });
            }
        }
        edges
    }

    fn alignment_edges(&self, track: &Track, settings: &LoopSettings) -> Vec<LoopEdge> {
        let Some(alignment) = track.base_alignment.as_ref() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        alignment
            .loop_edges(track.len())
            .into_iter()
            .filter(|(_, _, sim)| *sim >= settings.loop_threshold)
            .filter(|(src, dst, _)| seen.insert((*src, *dst)))
            .map(|(src, dst, sim)| Self::make_edge(track, src, dst, sim))
            .collect()
    }

    fn fallback_edges(&self, track: &Track, neighbors: &NeighborTable, settings: &LoopSettings) -> Vec<LoopEdge> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for source in 0..track.len() {
            for n in neighbors.good_neighbors(source) {
                if n.index >= source || source - n.index < settings.min_loop_beats {
                    continue;
                }
                if !seen.insert((source, n.index)) {
                    continue;
                }
                let similarity = 1.0 - (n.distance / FALLBACK_DISTANCE_SCALE).min(1.0);
                edges.push(Self::make_edge(track, source, n.index, similarity));
            }
        }
        edges.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        debug!("Derived {} fallback loop edges from neighbors", edges.len());
        edges
    }

    /// Jump from each section start back to the previous section start
    fn bridge_edges(&self, track: &Track, settings: &LoopSettings) -> Vec<LoopEdge> {
        let anchors = track.section_anchors();
        anchors
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1] - pair[0] >= settings.min_loop_beats)
            .map(|(i, pair)| {
                let k = i + 1;
                let similarity = 0.25 + (k % 4) as f64 * 0.05;
                Self::make_edge(track, pair[1], pair[0], similarity)
            })
            .collect()
    }
}

impl Default for LoopGraphBuilder {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}
