//! # Analysis Ingest
//!
//! Validates and normalizes a per-beat analysis document into the engine's
//! beat arena. Beats are addressed by their index everywhere else in the crate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beat_remix_graph::analysis::{AnalysisIngest, TrackAnalysis};
//!
//! # fn main() -> beat_remix_graph::Result<()> {
//! let json = std::fs::read_to_string("analysis.json")?;
//! let analysis = TrackAnalysis::from_json(&json)?;
//! let track = AnalysisIngest::new().ingest(analysis);
//!
//! println!("{} beats, grid of {}", track.len(), track.grid_size());
//! # Ok(())
//! # }
//! ```

pub mod ingest;
pub mod types;

pub use ingest::AnalysisIngest;
pub use types::{
    BaseAlignment, Beat, BeatIndex, FeatureSegment, LoopCandidate, LoopCandidateSource,
    LoopDirection, Track, TrackAnalysis,
};
