//! # Settings
//!
//! Four tunable parameter groups (`canonOverlay`, `eternalOverlay`,
//! `jukeboxLoop`, `eternalLoop`), each with a typed field schema, an enable
//! flag and a preset list. Values are clamped into their domain on every
//! mutation path; unknown keys in imported documents are ignored.
//!
//! ## Usage
//!
//! ```rust
//! use beat_remix_graph::settings::{GroupKind, SettingsManager};
//!
//! let mut settings = SettingsManager::new();
//! let stored = settings.update_field(GroupKind::JukeboxLoop, "loopThreshold", 5.0);
//! assert_eq!(stored, Some(0.99));
//!
//! let preset = settings.save_preset(GroupKind::JukeboxLoop, "Strict");
//! let document = settings.export_preset(GroupKind::JukeboxLoop, &preset.id).unwrap();
//! assert_eq!(document.version, 1);
//! ```

pub mod manager;
pub mod presets;
pub mod schema;

pub use manager::{GroupSettingsView, GroupState, ImportReport, SettingsDocument, SettingsManager};
pub use presets::{built_in_presets, Preset, PresetDocument, PRESET_DOCUMENT_VERSION};
pub use schema::{FieldSpec, GroupKind, SettingsMap};
