//! Synthetic tracks shared by the unit tests.

use crate::analysis::types::{RawBeat, RawSegment, TrackAnalysis};
use crate::analysis::{AnalysisIngest, Track};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("beat_remix_graph=debug")
        .try_init();
}

/// Feature segment whose values repeat every `period` beats, so beats one
/// period apart are near-identical
pub fn periodic_segment(index: usize, period: usize) -> RawSegment {
    let phase = (index % period) as f64;
    RawSegment {
        timbre: vec![phase * 3.0, 10.0 - phase, (phase * 0.7).sin() * 5.0],
        pitches: vec![(phase / period as f64), 0.5, 1.0 - phase / period as f64],
        loudness_start: -30.0 + phase,
        loudness_max: -12.0 + (index % 5) as f64,
        duration: 0.5,
        confidence: 0.6,
    }
}

/// Beats of 0.5s, `sections` equal sections, features periodic in `period`
pub fn periodic_analysis(beats: usize, sections: usize, period: usize) -> TrackAnalysis {
    let per_section = (beats / sections.max(1)).max(1);
    let raw = (0..beats)
        .map(|i| RawBeat {
            start: i as f64 * 0.5,
            duration: 0.5,
            confidence: 0.7,
            section: Some(((i / per_section).min(sections.max(1) - 1)) as i64),
            features: vec![periodic_segment(i, period), periodic_segment(i + 1, period)],
        })
        .collect();

    TrackAnalysis {
        beats: raw,
        duration_seconds: Some(beats as f64 * 0.5),
        time_signature: Some(4.0),
        ..Default::default()
    }
}

pub fn periodic_track(beats: usize, sections: usize, period: usize) -> Track {
    AnalysisIngest::new().ingest(periodic_analysis(beats, sections, period))
}

/// Every beat carries the same features, all in one section
pub fn uniform_analysis(beats: usize) -> TrackAnalysis {
    let segment = RawSegment {
        timbre: vec![1.0, 2.0, 3.0],
        pitches: vec![0.2, 0.4, 0.6],
        loudness_start: -20.0,
        loudness_max: -10.0,
        duration: 1.0,
        confidence: 0.5,
    };
    let raw = (0..beats)
        .map(|i| RawBeat {
            start: i as f64,
            duration: 1.0,
            confidence: 0.5,
            section: Some(0),
            features: vec![segment.clone()],
        })
        .collect();

    TrackAnalysis {
        beats: raw,
        duration_seconds: Some(beats as f64),
        time_signature: Some(4.0),
        ..Default::default()
    }
}
