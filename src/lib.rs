//! # Beat Remix Graph
//!
//! Turns a track's per-beat audio analysis into the graphs a remix player
//! needs: ranked similar beats, a loop-jump graph for endless playback, and a
//! per-beat "canon" overlay that pairs each beat with a similar beat elsewhere
//! in the track.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beat_remix_graph::{GroupKind, Mode, RemixEngine, TrackAnalysis};
//!
//! # fn main() -> beat_remix_graph::Result<()> {
//! # let json = "{}";
//! let analysis = TrackAnalysis::from_json(json)?;
//!
//! let mut engine = RemixEngine::default();
//! engine.load_track(analysis);
//! engine.set_group_enabled(GroupKind::CanonOverlay, true);
//! engine.set_mode(Mode::Canon);
//!
//! if let Some(target) = engine.overlay_target(0) {
//!     println!("beat 0 overlays beat {} at gain {:.2}", target.other, target.gain);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`analysis`] - Analysis document parsing and normalization into a beat arena
//! - [`graph`] - Beat similarity, loop graph and the playback driver port
//! - [`overlay`] - Canon overlay mapping
//! - [`settings`] - Tunable groups, presets and settings documents
//! - [`scheduler`] - Clock port and debounce bookkeeping
//! - [`engine`] - Facade wiring everything together
//! - [`config`] - Engine constants loaded from TOML
//!
//! ## Driving Playback
//!
//! The engine never plays audio. Implement [`PlaybackDriver`](graph::PlaybackDriver)
//! for the player; every method is optional:
//!
//! ```rust
//! use beat_remix_graph::graph::{LoopGraph, LoopSettings, PlaybackDriver};
//!
//! struct MyPlayer {
//!     jumps: usize,
//! }
//!
//! impl PlaybackDriver for MyPlayer {
//!     fn name(&self) -> &str {
//!         "my_player"
//!     }
//!
//!     fn recompute_loop_graph(&mut self, _settings: &LoopSettings, graph: &LoopGraph) -> bool {
//!         self.jumps = graph.len();
//!         true
//!     }
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod overlay;
pub mod scheduler;
pub mod settings;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use crate::{
    analysis::{Track, TrackAnalysis},
    config::EngineConfig,
    engine::{Mode, RemixEngine},
    error::{EngineError, Result},
    graph::PlaybackDriver,
    settings::GroupKind,
};
