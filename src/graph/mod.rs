//! # Beat Graph
//!
//! Nearest-neighbor similarity between beats and the directed loop-jump graph
//! derived from it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beat_remix_graph::analysis::AnalysisIngest;
//! use beat_remix_graph::graph::{LoopGraphBuilder, LoopSettings, SimilarityIndex};
//! use beat_remix_graph::settings::GroupKind;
//! # use beat_remix_graph::analysis::TrackAnalysis;
//! # let analysis = TrackAnalysis::default();
//!
//! let track = AnalysisIngest::new().ingest(analysis);
//! let neighbors = SimilarityIndex::default().build(&track, false);
//!
//! let settings = LoopSettings::defaults(GroupKind::JukeboxLoop);
//! let graph = LoopGraphBuilder::default().build(&track, &neighbors, &settings);
//! println!("{} loop edges", graph.len());
//! ```

pub mod driver;
pub mod loops;
pub mod similarity;

pub use driver::{forward_loop_settings, ForwardReport, NullDriver, PlaybackDriver};
pub use loops::{LoopEdge, LoopEdgeOrigin, LoopGraph, LoopGraphBuilder, LoopSettings};
pub use similarity::{BeatNeighbors, Neighbor, NeighborTable, SimilarityIndex};
