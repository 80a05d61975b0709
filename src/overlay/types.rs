use std::fmt;

use crate::analysis::types::BeatIndex;
use crate::settings::schema::{sanitize, GroupKind, SettingsMap};

/// Where a beat's overlay voice plays from, and how loud
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayTarget {
    pub other: BeatIndex,
    /// Always within [0, 1]
    pub gain: f64,
}

impl OverlayTarget {
    /// Degraded default: the beat itself, silent
    pub fn silent(index: BeatIndex) -> Self {
        Self { other: index, gain: 0.0 }
    }

    /// Signed offset from `index` to the target
    pub fn offset_from(&self, index: BeatIndex) -> i64 {
        self.other as i64 - index as i64
    }
}

/// Label of a base-alignment segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentLabel {
    Primary,
    Fallback,
    Other(String),
}

impl SegmentLabel {
    /// Unlabelled segments count as primary
    pub fn parse(label: Option<&str>) -> Self {
        match label {
            None | Some("primary") => Self::Primary,
            Some("fallback") => Self::Fallback,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
            Self::Other(label) => f.write_str(label),
        }
    }
}

/// Base-alignment metadata attached to a beat
#[derive(Debug, Clone, PartialEq)]
pub struct CanonSegmentInfo {
    pub segment: Option<usize>,
    pub label: Option<SegmentLabel>,
    /// Forward circular offset of the paired beat
    pub offset: usize,
    pub phase_alignment: Option<f64>,
    pub mean_similarity: Option<f64>,
    /// Raw pair similarity in [-1, 1]
    pub similarity: f64,
}

/// Lifecycle of the mapping of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperPhase {
    Uninitialized,
    BaseAligned,
    /// Advanced mode off: base mapping plus volume normalization
    NormalizedOnly,
    Enriched,
    Smoothed,
    Normalized,
}

/// Overlay group parameters after sanitization
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySettings {
    pub musicality: f64,
    pub min_offset_beats: usize,
    pub max_offset_beats: usize,
    pub dwell_beats: usize,
    pub density: usize,
    pub jump_bubble_beats: usize,
    pub variation: usize,
}

impl OverlaySettings {
    pub fn from_values(group: GroupKind, values: &SettingsMap) -> Self {
        let clean = sanitize(group, values);
        let get = |key: &str| clean.get(key).copied().unwrap_or(0.0);
        Self {
            musicality: get("musicality").clamp(0.0, 100.0),
            min_offset_beats: get("minOffsetBeats") as usize,
            max_offset_beats: get("maxOffsetBeats") as usize,
            dwell_beats: (get("dwellBeats") as usize).max(1),
            density: (get("density") as usize).max(1),
            jump_bubble_beats: get("jumpBubbleBeats") as usize,
            variation: get("variation") as usize,
        }
    }

    pub fn defaults(group: GroupKind) -> Self {
        Self::from_values(group, &group.defaults())
    }

    /// Beats skipped between enrichment runs before jitter
    pub fn enrich_spacing(&self) -> usize {
        let spaced = (36.0 / self.density as f64).round() as usize + 12;
        spaced.max(8)
    }

    /// Length of one enrichment run
    pub fn enrich_run_length(&self) -> usize {
        (self.density + 2).clamp(2, 8)
    }

    pub fn enrich_jitter(&self) -> usize {
        (self.variation + 2).min(10)
    }

    /// Running-median window of the smoothing pass
    pub fn smoothing_window(&self) -> usize {
        (7 + self.variation).min(15)
    }
}

/// Offset magnitude bounds resolved against a track's beat count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBounds {
    pub min: usize,
    pub max: usize,
}

impl OffsetBounds {
    /// Derive per-track bounds without touching the stored settings
    pub fn resolve(settings: &OverlaySettings, beat_count: usize) -> Self {
        let ceiling = beat_count.saturating_sub(1).max(1);
        let min = settings.min_offset_beats.max(1).min(ceiling);
        let mut max = settings.max_offset_beats.max(min + 1).min(ceiling);
        if max <= min {
            max = (min + 8).min(ceiling).max(min + 1);
        }
        Self { min, max }
    }

    pub fn contains(&self, magnitude: usize) -> bool {
        magnitude >= self.min && magnitude <= self.max
    }

    pub fn contains_offset(&self, offset: i64) -> bool {
        self.contains(offset.unsigned_abs() as usize)
    }
}
