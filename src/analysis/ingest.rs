use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::analysis::types::{
    Beat, BeatIndex, CircularCandidate, FeatureSegment, LegacyLoopEdge, LoopCandidate,
    LoopCandidateMap, LoopCandidateSource, LoopDirection, RawBeat, Track, TrackAnalysis,
};
use crate::config::SimilarityConfig;

/// Final beat duration is capped at this multiple of the median beat duration
const LAST_BEAT_MEDIAN_CAP: f64 = 1.6;

/// Floor for the time left after the last beat starts
const MIN_REMAINING_SECONDS: f64 = 0.1;

/// Turns an analysis document into the engine's beat arena
///
/// Ingest never fails: an empty beat list yields an empty track, non-finite
/// timing yields a degraded track whose beats all map to themselves.
pub struct AnalysisIngest {
    loop_candidates_per_beat: usize,
}

impl AnalysisIngest {
    pub fn new() -> Self {
        Self::with_config(&SimilarityConfig::default())
    }

    pub fn with_config(config: &SimilarityConfig) -> Self {
        Self { loop_candidates_per_beat: config.loop_candidates_per_beat }
    }

    pub fn ingest(&self, analysis: TrackAnalysis) -> Track {
        let TrackAnalysis {
            beats: raw_beats,
            sections,
            duration_seconds,
            time_signature,
            base_alignment,
            circular_loop_candidates,
            legacy_loop_candidates,
        } = analysis;

        if raw_beats.is_empty() {
            warn!("Analysis contains no beats, engine stays idle");
            return Track { time_signature, ..Track::default() };
        }

        let degraded = raw_beats
            .iter()
            .any(|b| !b.start.is_finite() || !b.duration.is_finite())
            || duration_seconds.map_or(false, |d| !d.is_finite());
        if degraded {
            warn!("Analysis has non-finite beat timing, overlay disabled for this track");
        }

        let section_count = Self::section_count(&raw_beats, sections.len());
        let section_starts: Vec<f64> = sections.iter().map(|s| s.start).collect();

        let mut beats: Vec<Beat> = raw_beats
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let start = finite_or_zero(raw.start);
                let section = Self::resolve_section(&raw, start, &section_starts, section_count);
                Beat {
                    index,
                    start,
                    duration: finite_or_zero(raw.duration),
                    confidence: finite_or_zero(raw.confidence),
                    section,
                    features: raw.features.into_iter().map(FeatureSegment::from).collect(),
                }
            })
            .collect();

        let duration = duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or_else(|| {
                beats.last().map(|b| b.start + b.duration).unwrap_or(0.0)
            });

        if !degraded {
            Self::normalize_last_beat(&mut beats, duration);
        }

        let mut track = Track {
            beats,
            duration,
            section_count,
            time_signature,
            base_alignment,
            loop_candidates: LoopCandidateMap::new(),
            loop_candidate_source: None,
            degraded,
        };

        let (map, source) = self.prepare_loop_candidates(
            &track,
            circular_loop_candidates,
            legacy_loop_candidates,
        );
        track.loop_candidates = map;
        track.loop_candidate_source = Some(source);

        info!(
            "Ingested {} beats across {} sections ({:.1}s, loop candidates: {:?})",
            track.len(),
            track.section_count,
            track.duration,
            source
        );

        track
    }

    fn section_count(raw_beats: &[RawBeat], declared: usize) -> usize {
        if declared > 0 {
            return declared;
        }
        raw_beats
            .iter()
            .filter_map(|b| b.section)
            .filter(|s| *s >= 0)
            .max()
            .map(|s| s as usize + 1)
            .unwrap_or(1)
    }

    /// Section index of a beat, clamped to the last valid section
    fn resolve_section(
        raw: &RawBeat,
        start: f64,
        section_starts: &[f64],
        section_count: usize,
    ) -> usize {
        let last = section_count.saturating_sub(1);
        let section = match raw.section {
            Some(s) if s >= 0 => s as usize,
            _ => section_starts
                .iter()
                .rposition(|&s| s <= start + 1e-9)
                .unwrap_or(0),
        };
        section.min(last)
    }

    /// Keep the trailing beat from absorbing leftover track time
    fn normalize_last_beat(beats: &mut [Beat], track_duration: f64) {
        let Some((last, rest)) = beats.split_last_mut() else {
            return;
        };

        let remaining = (track_duration - last.start).max(MIN_REMAINING_SECONDS);
        let mut durations: Vec<f64> = rest.iter().map(|b| b.duration).collect();
        durations.sort_by(|a, b| a.total_cmp(b));
        let median = durations.get(durations.len() / 2).copied().unwrap_or(remaining);

        let cap = if median > 0.0 { median * LAST_BEAT_MEDIAN_CAP } else { remaining };
        let normalized = remaining.min(cap);
        if (normalized - last.duration).abs() > f64::EPSILON {
            debug!(
                "Last beat duration {:.3}s -> {:.3}s (median {:.3}s)",
                last.duration, normalized, median
            );
        }
        last.duration = normalized;
    }

    /// Circular candidates win; legacy edges and then alignment edges are fallbacks
    fn prepare_loop_candidates(
        &self,
        track: &Track,
        circular: Option<BTreeMap<String, Vec<CircularCandidate>>>,
        legacy: Option<Vec<LegacyLoopEdge>>,
    ) -> (LoopCandidateMap, LoopCandidateSource) {
        let n = track.len();
        let in_range = |idx: i64| idx >= 0 && (idx as usize) < n;
        let mut map = LoopCandidateMap::new();
        let mut source = LoopCandidateSource::None;

        if let Some(circular) = circular {
            for (key, candidates) in circular {
                let Ok(src) = key.trim().parse::<usize>() else {
                    debug!("Skipping loop candidates with non-numeric key {:?}", key);
                    continue;
                };
                if src >= n {
                    continue;
                }
                for cand in candidates {
                    let (Some(target), Some(similarity)) = (cand.target, cand.similarity) else {
                        continue;
                    };
                    if !in_range(target) || !similarity.is_finite() {
                        continue;
                    }
                    let target = target as BeatIndex;
                    let span = cand.span.filter(|s| *s != 0).unwrap_or(target as i64 - src as i64);
                    map.entry(src).or_insert_with(Vec::new).push(LoopCandidate {
                        target,
                        similarity,
                        span,
                        direction: cand.direction.unwrap_or(LoopDirection::Backward),
                        section_match: cand.section_match,
                    });
                }
            }
            if !map.is_empty() {
                source = LoopCandidateSource::Circular;
            }
        }

        if map.is_empty() {
            let (edges, fallback_source) = match legacy {
                Some(edges) if !edges.is_empty() => (edges, LoopCandidateSource::Legacy),
                _ => (
                    track
                        .base_alignment
                        .as_ref()
                        .map(|a| a.loop_candidates.clone())
                        .unwrap_or_default(),
                    LoopCandidateSource::Alignment,
                ),
            };
            for edge in edges {
                let (Some(src), Some(dst)) = (edge.source, edge.target) else {
                    continue;
                };
                if !in_range(src) || !in_range(dst) {
                    continue;
                }
                let (src, dst) = (src as BeatIndex, dst as BeatIndex);
                map.entry(src).or_insert_with(Vec::new).push(LoopCandidate {
                    target: dst,
                    similarity: edge.similarity.filter(|s| s.is_finite()).unwrap_or(0.0),
                    span: dst as i64 - src as i64,
                    direction: LoopDirection::between(src, dst),
                    section_match: None,
                });
            }
            if !map.is_empty() {
                source = fallback_source;
            }
        }

        for entries in map.values_mut() {
            // Stable: equal similarities keep document order
            entries.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            entries.truncate(self.loop_candidates_per_beat);
        }

        (map, source)
    }
}

impl Default for AnalysisIngest {
    fn default() -> Self {
        Self::new()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{BaseAlignment, RawSection, RawSegment};

    fn raw_beat(start: f64, duration: f64, section: Option<i64>) -> RawBeat {
        RawBeat {
            start,
            duration,
            confidence: 0.5,
            section,
            features: vec![RawSegment { loudness_max: -12.0, duration, ..Default::default() }],
        }
    }

    fn analysis(beats: Vec<RawBeat>, duration: f64) -> TrackAnalysis {
        TrackAnalysis {
            beats,
            duration_seconds: Some(duration),
            time_signature: Some(4.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_beat_list_yields_empty_track() {
        let track = AnalysisIngest::new().ingest(TrackAnalysis::default());
        assert!(track.is_empty());
        assert!(!track.is_usable());
    }

    #[test]
    fn test_last_beat_duration_is_capped() {
        let beats = (0..5).map(|i| raw_beat(i as f64 * 0.5, 0.5, Some(0))).collect();
        // 10 seconds of track but the last beat starts at 2.0
        let track = AnalysisIngest::new().ingest(analysis(beats, 10.0));
        let last = track.beats.last().unwrap();
        assert!((last.duration - 0.8).abs() < 1e-9, "got {}", last.duration);
    }

    #[test]
    fn test_last_beat_keeps_short_remainder() {
        let beats = (0..4).map(|i| raw_beat(i as f64 * 0.5, 0.5, Some(0))).collect();
        let track = AnalysisIngest::new().ingest(analysis(beats, 1.9));
        assert!((track.beats[3].duration - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_section_overshoot_is_clamped() {
        let beats = vec![
            raw_beat(0.0, 0.5, None),
            raw_beat(0.5, 0.5, None),
            raw_beat(1.0, 0.5, Some(7)),
        ];
        let mut doc = analysis(beats, 1.5);
        doc.sections = vec![
            RawSection { start: 0.0, duration: 0.6 },
            RawSection { start: 0.6, duration: 0.9 },
        ];

        let track = AnalysisIngest::new().ingest(doc);
        assert_eq!(track.section_count, 2);
        assert_eq!(track.beats[0].section, 0);
        assert_eq!(track.beats[1].section, 0);
        assert_eq!(track.beats[2].section, 1);
        assert_eq!(track.section_anchors(), vec![0, 2]);
    }

    #[test]
    fn test_non_finite_timing_degrades_track() {
        let beats = vec![raw_beat(0.0, 0.5, Some(0)), raw_beat(f64::NAN, 0.5, Some(0))];
        let track = AnalysisIngest::new().ingest(analysis(beats, 1.0));
        assert!(track.degraded);
        assert!(!track.is_usable());
        assert_eq!(track.beats[1].start, 0.0);
    }

    #[test]
    fn test_circular_candidates_take_priority() {
        let beats = (0..8).map(|i| raw_beat(i as f64 * 0.5, 0.5, Some(0))).collect();
        let mut doc = analysis(beats, 4.0);
        let mut circular = BTreeMap::new();
        circular.insert(
            "6".to_string(),
            vec![
                CircularCandidate { target: Some(1), similarity: Some(0.2), ..Default::default() },
                CircularCandidate { target: Some(2), similarity: Some(0.8), ..Default::default() },
                CircularCandidate { target: Some(99), similarity: Some(0.9), ..Default::default() },
            ],
        );
        circular.insert("bogus".to_string(), vec![]);
        doc.circular_loop_candidates = Some(circular);
        doc.legacy_loop_candidates = Some(vec![LegacyLoopEdge {
            source: Some(0),
            target: Some(3),
            similarity: Some(0.5),
        }]);

        let track = AnalysisIngest::new().ingest(doc);
        assert_eq!(track.loop_candidate_source, Some(LoopCandidateSource::Circular));
        let edges = &track.loop_candidates[&6];
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].target, 2);
        assert_eq!(edges[0].span, -4);
        assert!(!track.loop_candidates.contains_key(&0));
    }

    #[test]
    fn test_alignment_edges_are_last_fallback() {
        let beats = (0..8).map(|i| raw_beat(i as f64 * 0.5, 0.5, Some(0))).collect();
        let mut doc = analysis(beats, 4.0);
        doc.base_alignment = Some(BaseAlignment {
            loop_candidates: vec![LegacyLoopEdge {
                source: Some(7),
                target: Some(3),
                similarity: Some(0.6),
            }],
            ..Default::default()
        });

        let track = AnalysisIngest::new().ingest(doc);
        assert_eq!(track.loop_candidate_source, Some(LoopCandidateSource::Alignment));
        assert_eq!(track.loop_candidates[&7][0].direction, LoopDirection::Backward);
    }
}
