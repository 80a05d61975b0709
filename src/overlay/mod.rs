//! # Overlay Mapping
//!
//! Pairs every beat with another beat of the same track so a second, offset
//! voice can play along at reduced gain.
//!
//! The mapping starts from a base (a precomputed alignment, or a per-section
//! majority offset when none fits) that is snapshotted once per track. Every
//! recompute restores that base and, when the overlay group is enabled, runs:
//!
//! 1. **Bounds**: pull offsets into `[minOffsetBeats, maxOffsetBeats]`
//! 2. **Enrichment**: retarget short runs in the middle of the track
//! 3. **Smoothing**: running-median offsets snapped to musical intervals, with dwell hysteresis
//! 4. **Bounds** again, then volume normalization
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beat_remix_graph::analysis::AnalysisIngest;
//! use beat_remix_graph::graph::SimilarityIndex;
//! use beat_remix_graph::overlay::{OverlayMapper, OverlaySettings};
//! use beat_remix_graph::settings::GroupKind;
//! # use beat_remix_graph::analysis::TrackAnalysis;
//! # let analysis = TrackAnalysis::default();
//!
//! let track = AnalysisIngest::new().ingest(analysis);
//! let neighbors = SimilarityIndex::default().build(&track, true);
//!
//! let mut mapper = OverlayMapper::default();
//! mapper.initialize(&track, &neighbors);
//! let settings = OverlaySettings::defaults(GroupKind::CanonOverlay);
//! mapper.regenerate(&track, &neighbors, Some(&settings));
//!
//! if let Some(target) = mapper.target(0) {
//!     println!("beat 0 plays beat {} at gain {:.2}", target.other, target.gain);
//! }
//! ```

pub mod bounds;
pub mod enrich;
pub mod mapper;
pub mod smoothing;
pub mod types;
pub mod volume;

pub use mapper::{BaseOutcome, BaseSnapshot, OverlayMapper};
pub use types::{
    CanonSegmentInfo, MapperPhase, OffsetBounds, OverlaySettings, OverlayTarget, SegmentLabel,
};
