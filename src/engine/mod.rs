//! # Remix Engine
//!
//! The facade the surrounding application talks to. It owns the loaded
//! track's derived state, the settings groups and the debounce bookkeeping,
//! and forwards loop parameters to the playback driver.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beat_remix_graph::engine::{Mode, RemixEngine};
//! use beat_remix_graph::settings::GroupKind;
//! # fn main() -> beat_remix_graph::Result<()> {
//! # let json = "{}";
//!
//! let mut engine = RemixEngine::default();
//! engine.load_track_json(json)?;
//! engine.set_mode(Mode::Eternal);
//! engine.set_group_enabled(GroupKind::EternalLoop, true);
//!
//! // Slider edits are debounced; call poll() from the host's tick
//! engine.update_field(GroupKind::EternalLoop, "loopThreshold", 0.8);
//! engine.poll();
//!
//! for edge in engine.loop_edges(0) {
//!     println!("0 -> {} ({:.2})", edge.target, edge.similarity);
//! }
//! # Ok(())
//! # }
//! ```

pub mod facade;
pub mod mode;

pub use facade::{EdgeKind, EngineState, RemixEngine, VisualizationEdge};
pub use mode::Mode;
