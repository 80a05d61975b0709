use std::collections::BTreeMap;

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PresetError, Result};
use crate::settings::presets::{
    built_in_presets, generate_preset_id, numeric_entries, Preset, PresetDocument,
};
use crate::settings::schema::{merge, quantize_beats, sanitize, GroupKind, SettingsMap};

/// Version written into whole-settings documents
pub const SETTINGS_DOCUMENT_VERSION: u32 = 1;

/// Live state of one group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    pub enabled: bool,
    pub values: SettingsMap,
    pub presets: Vec<Preset>,
}

impl GroupState {
    fn new(group: GroupKind) -> Self {
        Self { enabled: false, values: group.defaults(), presets: built_in_presets(group) }
    }
}

/// Read-only view handed to the surrounding application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSettingsView {
    pub group: GroupKind,
    pub enabled: bool,
    pub fields: SettingsMap,
    pub defaults: SettingsMap,
}

/// Whole-settings document: `{version, beatRounding, groups: {name: {enabled, settings}}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    pub version: u32,
    #[serde(default, rename = "beatRounding", skip_serializing_if = "Option::is_none")]
    pub beat_rounding: Option<bool>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupDocument>,
}

impl SettingsDocument {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PresetError::SerializationFailed { reason: e.to_string() }.into())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: SettingsDocument = serde_json::from_str(content)
            .map_err(|e| PresetError::InvalidDocument { details: e.to_string() })?;
        if document.version == 0 || document.version > SETTINGS_DOCUMENT_VERSION {
            return Err(PresetError::UnsupportedVersion { version: document.version }.into());
        }
        Ok(document)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "numeric_entries")]
    pub settings: SettingsMap,
}

/// What an import changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub groups: Vec<GroupKind>,
    /// Unknown group names and `group.key` field paths
    pub ignored: Vec<String>,
}

/// Owns the four settings groups, their presets and the global toggles
///
/// Every mutation leaves the touched group fully sanitized. The manager never
/// recomputes anything itself; callers decide what to rebuild from the
/// returned values.
pub struct SettingsManager {
    /// Indexed by `GroupKind as usize`
    groups: [GroupState; 4],
    beat_rounding: bool,
    grid_size: u32,
    overlay_muted: bool,
    rng: SmallRng,
}

impl SettingsManager {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Manager whose preset ids come from the given generator
    pub fn with_rng(rng: SmallRng) -> Self {
        let groups = GroupKind::ALL.map(GroupState::new);
        Self { groups, beat_rounding: false, grid_size: 1, overlay_muted: false, rng }
    }

    fn state(&self, group: GroupKind) -> &GroupState {
        &self.groups[group as usize]
    }

    fn state_mut(&mut self, group: GroupKind) -> &mut GroupState {
        &mut self.groups[group as usize]
    }

    pub fn group(&self, group: GroupKind) -> &GroupState {
        self.state(group)
    }

    pub fn view(&self, group: GroupKind) -> GroupSettingsView {
        let state = self.state(group);
        GroupSettingsView {
            group,
            enabled: state.enabled,
            fields: state.values.clone(),
            defaults: group.defaults(),
        }
    }

    pub fn values(&self, group: GroupKind) -> &SettingsMap {
        &self.state(group).values
    }

    pub fn is_enabled(&self, group: GroupKind) -> bool {
        self.state(group).enabled
    }

    /// Stored values when enabled, factory defaults otherwise
    pub fn effective_values(&self, group: GroupKind) -> SettingsMap {
        let state = self.state(group);
        if state.enabled {
            state.values.clone()
        } else {
            group.defaults()
        }
    }

    /// Beat grid used for rounding, from the loaded track's time signature
    pub fn set_grid_size(&mut self, grid_size: u32) {
        self.grid_size = grid_size.max(1);
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Clamp and store one field; `None` for keys the group does not have
    pub fn update_field(&mut self, group: GroupKind, key: &str, value: f64) -> Option<f64> {
        let Some(spec) = group.field(key) else {
            warn!("Ignoring unknown field {}.{}", group, key);
            return None;
        };

        let rounding = self.beat_rounding && group.is_roundable(key);
        let grid = self.grid_size;
        let state = self.state_mut(group);
        let current = state.values.get(key).copied().unwrap_or(spec.default);

        let mut stored = spec.coerce(value, current);
        if rounding {
            stored = spec.coerce(quantize_beats(stored, grid), current);
        }

        state.values.insert(key.to_string(), stored);
        state.values = sanitize(group, &state.values);
        let stored = state.values.get(key).copied().unwrap_or(stored);
        debug!("{}.{} = {} (requested {})", group, key, stored, value);
        Some(stored)
    }

    /// Returns true when the flag changed
    pub fn set_group_enabled(&mut self, group: GroupKind, enabled: bool) -> bool {
        let state = self.state_mut(group);
        if state.enabled == enabled {
            return false;
        }
        state.enabled = enabled;
        info!("{} {}", group, if enabled { "enabled" } else { "disabled" });
        true
    }

    pub fn reset_group(&mut self, group: GroupKind) {
        self.state_mut(group).values = group.defaults();
        info!("{} reset to defaults", group);
    }

    pub fn beat_rounding(&self) -> bool {
        self.beat_rounding
    }

    /// Toggle rounding; enabling re-quantizes the beat fields of every group
    pub fn set_beat_rounding(&mut self, enabled: bool) -> Vec<GroupKind> {
        self.beat_rounding = enabled;
        if !enabled {
            return Vec::new();
        }

        let grid = self.grid_size;
        let mut changed = Vec::new();
        for group in GroupKind::ALL {
            let state = self.state_mut(group);
            let mut values = state.values.clone();
            for key in group.roundable_fields() {
                if let (Some(spec), Some(current)) = (group.field(key), values.get(*key).copied()) {
                    values.insert(key.to_string(), spec.coerce(quantize_beats(current, grid), current));
                }
            }
            let values = sanitize(group, &values);
            if values != state.values {
                state.values = values;
                changed.push(group);
            }
        }
        info!("Beat rounding on (grid {}), {} groups re-quantized", grid, changed.len());
        changed
    }

    pub fn overlay_muted(&self) -> bool {
        self.overlay_muted
    }

    pub fn set_overlay_muted(&mut self, muted: bool) {
        self.overlay_muted = muted;
    }

    // ==========================================
    // PRESETS
    // ==========================================

    pub fn presets(&self, group: GroupKind) -> &[Preset] {
        &self.state(group).presets
    }

    pub fn preset(&self, group: GroupKind, id: &str) -> Result<&Preset> {
        self.state(group)
            .presets
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found(group, id))
    }

    /// Snapshot the current values of a group under a new id
    pub fn save_preset(&mut self, group: GroupKind, name: &str) -> Preset {
        let name = match name.trim() {
            "" => format!("Preset {}", self.state(group).presets.len() + 1),
            trimmed => trimmed.to_string(),
        };
        let id = generate_preset_id(Utc::now(), &mut self.rng);
        let preset = Preset::new(id, name, self.state(group).values.clone());
        self.state_mut(group).presets.push(preset.clone());
        info!("Saved preset '{}' ({}) in {}", preset.name, preset.id, group);
        preset
    }

    /// Replace the group's values with a preset
    pub fn load_preset(&mut self, group: GroupKind, id: &str) -> Result<()> {
        let settings = self.preset(group, id)?.settings.clone();
        let (values, ignored) = merge(group, &group.defaults(), &settings);
        if !ignored.is_empty() {
            warn!("Preset {} carries unknown fields: {}", id, ignored.join(", "));
        }
        self.state_mut(group).values = values;
        info!("Loaded preset {} into {}", id, group);
        Ok(())
    }

    pub fn delete_preset(&mut self, group: GroupKind, id: &str) -> Result<Preset> {
        if self.preset(group, id)?.built_in {
            return Err(PresetError::ReadOnly { id: id.to_string() }.into());
        }
        let presets = &mut self.state_mut(group).presets;
        let position = presets.iter().position(|p| p.id == id).ok_or_else(|| not_found(group, id))?;
        let removed = presets.remove(position);
        info!("Deleted preset {} from {}", id, group);
        Ok(removed)
    }

    pub fn export_preset(&self, group: GroupKind, id: &str) -> Result<PresetDocument> {
        Ok(PresetDocument::from_preset(group, self.preset(group, id)?))
    }

    /// Validate a document and store it as a new preset of its group
    ///
    /// Unknown fields are dropped; known ones are clamped. Nothing changes when
    /// the document is invalid.
    pub fn import_preset(&mut self, document: &PresetDocument) -> Result<(GroupKind, Preset)> {
        document.validate()?;
        let group = document.group_kind()?;

        let (settings, ignored) = merge(group, &group.defaults(), &document.settings);
        if !ignored.is_empty() {
            warn!("Import into {} ignored fields: {}", group, ignored.join(", "));
        }

        let id = generate_preset_id(Utc::now(), &mut self.rng);
        let preset = Preset::new(id, document.name.trim().to_string(), settings);
        self.state_mut(group).presets.push(preset.clone());
        info!("Imported preset '{}' into {}", preset.name, group);
        Ok((group, preset))
    }

    pub fn import_preset_json(&mut self, content: &str) -> Result<(GroupKind, Preset)> {
        let document = PresetDocument::from_json(content)?;
        self.import_preset(&document)
    }

    // ==========================================
    // WHOLE-SETTINGS DOCUMENTS
    // ==========================================

    pub fn export_all(&self) -> SettingsDocument {
        let groups = GroupKind::ALL
            .into_iter()
            .map(|group| {
                let state = self.state(group);
                (
                    group.name().to_string(),
                    GroupDocument { enabled: Some(state.enabled), settings: state.values.clone() },
                )
            })
            .collect();
        SettingsDocument {
            version: SETTINGS_DOCUMENT_VERSION,
            beat_rounding: Some(self.beat_rounding),
            groups,
        }
    }

    /// Apply flags and values of known groups; unknown groups and keys are skipped
    pub fn import_all(&mut self, document: &SettingsDocument) -> ImportReport {
        let mut report = ImportReport::default();

        for (name, entry) in &document.groups {
            let Ok(group) = GroupKind::from_name(name) else {
                report.ignored.push(name.clone());
                continue;
            };

            let state = self.state_mut(group);
            let (values, ignored) = merge(group, &state.values, &entry.settings);
            state.values = values;
            if let Some(enabled) = entry.enabled {
                state.enabled = enabled;
            }
            report.ignored.extend(ignored.into_iter().map(|key| format!("{}.{}", name, key)));
            report.groups.push(group);
        }

        if let Some(rounding) = document.beat_rounding {
            self.set_beat_rounding(rounding);
        }

        if !report.ignored.is_empty() {
            warn!("Settings import ignored: {}", report.ignored.join(", "));
        }
        info!("Imported settings for {} groups", report.groups.len());
        report
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(group: GroupKind, id: &str) -> crate::error::EngineError {
    PresetError::NotFound { group: group.name().to_string(), id: id.to_string() }.into()
}
