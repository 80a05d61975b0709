use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Index of a beat inside its track. Stable for the lifetime of a loaded track.
pub type BeatIndex = usize;

// ==========================================
// INGEST DOCUMENT (external shape)
// ==========================================

/// Per-beat analysis document as produced by the analysis service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackAnalysis {
    #[serde(default)]
    pub beats: Vec<RawBeat>,

    /// Section boundaries, used when a beat carries no section index
    #[serde(default)]
    pub sections: Vec<RawSection>,

    #[serde(default, rename = "durationSeconds", alias = "duration_seconds", alias = "duration")]
    pub duration_seconds: Option<f64>,

    #[serde(default, rename = "timeSignature", alias = "time_signature")]
    pub time_signature: Option<f64>,

    #[serde(
        default,
        rename = "baseAlignment",
        alias = "base_alignment",
        alias = "canon_alignment"
    )]
    pub base_alignment: Option<BaseAlignment>,

    /// Keys are source beat indices; non-numeric keys are skipped on ingest
    #[serde(
        default,
        rename = "circularLoopCandidates",
        alias = "circular_loop_candidates",
        alias = "eternal_loop_candidates"
    )]
    pub circular_loop_candidates: Option<BTreeMap<String, Vec<CircularCandidate>>>,

    #[serde(
        default,
        rename = "legacyLoopCandidates",
        alias = "legacy_loop_candidates",
        alias = "loop_candidates"
    )]
    pub legacy_loop_candidates: Option<Vec<LegacyLoopEdge>>,
}

impl TrackAnalysis {
    /// Parse an analysis document from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let analysis: TrackAnalysis = serde_json::from_str(content)
            .map_err(|e| IngestError::ParseFailed { reason: e.to_string() })?;
        Ok(analysis)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBeat {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub section: Option<i64>,
    #[serde(default, alias = "overlappingSegments", alias = "segments")]
    pub features: Vec<RawSegment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub timbre: Vec<f64>,
    #[serde(default)]
    pub pitches: Vec<f64>,
    #[serde(default, alias = "loudnessStart")]
    pub loudness_start: f64,
    #[serde(default, alias = "loudnessMax")]
    pub loudness_max: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSection {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

/// Precomputed pairing of every beat with a partner beat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseAlignment {
    /// Partner index per beat; null or out-of-range entries fall back to `offset`
    #[serde(default)]
    pub pairs: Vec<Option<i64>>,

    /// Raw similarity per pair, in [-1, 1]
    #[serde(default, rename = "pairSimilarity", alias = "pair_similarity")]
    pub pair_similarity: Vec<f64>,

    #[serde(default)]
    pub offset: i64,

    #[serde(default)]
    pub segments: Vec<AlignmentSegment>,

    #[serde(default, rename = "coverageRatio", alias = "coverage_ratio")]
    pub coverage_ratio: Option<f64>,

    /// Nested `{ "ratio": .. }` spelling of the coverage ratio
    #[serde(default)]
    pub coverage: Option<AlignmentCoverage>,

    #[serde(default, rename = "similarityThreshold", alias = "similarity_threshold")]
    pub similarity_threshold: Option<f64>,

    #[serde(default)]
    pub transitions: Vec<LegacyLoopEdge>,

    #[serde(default, rename = "loopCandidates", alias = "loop_candidates")]
    pub loop_candidates: Vec<LegacyLoopEdge>,
}

impl BaseAlignment {
    pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

    pub fn threshold(&self) -> f64 {
        self.similarity_threshold
            .filter(|t| t.is_finite())
            .unwrap_or(Self::DEFAULT_SIMILARITY_THRESHOLD)
    }

    pub fn coverage(&self) -> Option<f64> {
        self.coverage_ratio
            .or_else(|| self.coverage.as_ref().and_then(|c| c.ratio))
            .filter(|r| r.is_finite())
    }

    /// Loop candidates at or above the threshold; forward edges also yield
    /// their reverse so both directions are jumpable
    pub fn loop_edges(&self, beat_count: usize) -> Vec<(BeatIndex, BeatIndex, f64)> {
        let n = beat_count as i64;
        let threshold = self.threshold();
        let mut edges = Vec::new();
        for edge in &self.loop_candidates {
            let (Some(src), Some(dst)) = (edge.source, edge.target) else {
                continue;
            };
            if !(0..n).contains(&src) || !(0..n).contains(&dst) || src == dst {
                continue;
            }
            let sim = edge.similarity.filter(|s| s.is_finite()).unwrap_or(0.0);
            if sim < threshold {
                continue;
            }
            let (src, dst) = (src as BeatIndex, dst as BeatIndex);
            edges.push((src, dst, sim));
            if dst > src {
                edges.push((dst, src, sim));
            }
        }
        edges
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentCoverage {
    #[serde(default)]
    pub ratio: Option<f64>,
}

/// Labelled beat range of a base alignment (`end` exclusive)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "meanSimilarity", alias = "mean_similarity")]
    pub mean_similarity: Option<f64>,
    #[serde(default, rename = "phaseAlignment", alias = "phase_alignment")]
    pub phase_alignment: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircularCandidate {
    pub target: Option<i64>,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub span: Option<i64>,
    #[serde(default)]
    pub direction: Option<LoopDirection>,
    #[serde(default, rename = "sectionMatch", alias = "section_match")]
    pub section_match: Option<bool>,
}

/// Simple directed edge (legacy loop candidates, alignment transitions)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyLoopEdge {
    pub source: Option<i64>,
    pub target: Option<i64>,
    #[serde(default)]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopDirection {
    Forward,
    Backward,
}

impl LoopDirection {
    pub fn between(source: BeatIndex, target: BeatIndex) -> Self {
        if target < source {
            Self::Backward
        } else {
            Self::Forward
        }
    }
}

// ==========================================
// ENGINE MODEL
// ==========================================

/// One timbre/pitch/loudness descriptor overlapping a beat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSegment {
    pub timbre: Vec<f64>,
    pub pitches: Vec<f64>,
    pub loudness_start: f64,
    pub loudness_max: f64,
    pub duration: f64,
    pub confidence: f64,
}

impl From<RawSegment> for FeatureSegment {
    fn from(raw: RawSegment) -> Self {
        Self {
            timbre: raw.timbre,
            pitches: raw.pitches,
            loudness_start: raw.loudness_start,
            loudness_max: raw.loudness_max,
            duration: raw.duration,
            confidence: raw.confidence,
        }
    }
}

/// Atomic unit of remix scheduling. Feature fields never change after ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct Beat {
    pub index: BeatIndex,
    pub start: f64,
    pub duration: f64,
    pub confidence: f64,
    pub section: usize,
    pub features: Vec<FeatureSegment>,
}

impl Beat {
    /// Loudness used for overlay volume normalization (dB)
    pub fn loudness(&self) -> f64 {
        if self.features.is_empty() {
            return -60.0;
        }
        self.features.iter().map(|f| f.loudness_max).sum::<f64>() / self.features.len() as f64
    }
}

/// Which input the prepared loop candidates were taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCandidateSource {
    Circular,
    Legacy,
    Alignment,
    None,
}

/// Prepared loop candidate edge
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCandidate {
    pub target: BeatIndex,
    /// Raw similarity in [-1, 1]
    pub similarity: f64,
    pub span: i64,
    pub direction: LoopDirection,
    pub section_match: Option<bool>,
}

/// Source beat → candidate edges, sorted by descending similarity
pub type LoopCandidateMap = BTreeMap<BeatIndex, Vec<LoopCandidate>>;

/// Ingested track: an arena of beats addressed by index
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub beats: Vec<Beat>,

    /// Total duration in seconds
    pub duration: f64,

    pub section_count: usize,

    pub time_signature: Option<f64>,

    pub base_alignment: Option<BaseAlignment>,

    pub loop_candidates: LoopCandidateMap,

    pub loop_candidate_source: Option<LoopCandidateSource>,

    /// Set when the analysis could not be trusted; the engine then maps every
    /// beat to itself with zero overlay gain
    pub degraded: bool,
}

impl Track {
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn beat(&self, index: BeatIndex) -> Option<&Beat> {
        self.beats.get(index)
    }

    pub fn section_of(&self, index: BeatIndex) -> Option<usize> {
        self.beats.get(index).map(|b| b.section)
    }

    /// Beat-count grid derived from the time signature (at least 1)
    pub fn grid_size(&self) -> u32 {
        match self.time_signature {
            Some(ts) if ts.is_finite() && ts >= 1.0 => ts.round() as u32,
            _ => 1,
        }
    }

    /// First beat of every section, in playback order
    pub fn section_anchors(&self) -> Vec<BeatIndex> {
        let mut anchors = Vec::new();
        let mut last_section = None;
        for beat in &self.beats {
            if last_section != Some(beat.section) {
                anchors.push(beat.index);
                last_section = Some(beat.section);
            }
        }
        anchors
    }

    /// True when both beats share a section or sit in neighboring sections
    pub fn sections_adjacent(&self, a: BeatIndex, b: BeatIndex) -> bool {
        match (self.section_of(a), self.section_of(b)) {
            (Some(sa), Some(sb)) => sa.abs_diff(sb) <= 1,
            _ => false,
        }
    }

    /// True when the track can drive similarity and overlay computation
    pub fn is_usable(&self) -> bool {
        !self.beats.is_empty() && !self.degraded
    }
}
