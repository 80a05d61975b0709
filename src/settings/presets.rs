use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PresetError, Result};
use crate::settings::schema::{GroupKind, SettingsMap};

/// Version written into exported documents
pub const PRESET_DOCUMENT_VERSION: u32 = 1;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Named snapshot of a group's settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub settings: SettingsMap,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Shipped presets cannot be deleted
    #[serde(default, rename = "builtIn")]
    pub built_in: bool,
}

impl Preset {
    pub fn new(id: String, name: String, settings: SettingsMap) -> Self {
        Self { id, name, settings, created_at: Utc::now(), built_in: false }
    }

    fn shipped(id: &str, name: &str, settings: SettingsMap) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            settings,
            created_at: DateTime::<Utc>::default(),
            built_in: true,
        }
    }
}

/// Portable preset document: `{version, group, name, settings}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetDocument {
    pub version: u32,
    pub group: String,
    pub name: String,
    /// Non-numeric entries are dropped on read
    #[serde(deserialize_with = "numeric_entries")]
    pub settings: SettingsMap,
}

impl PresetDocument {
    pub fn from_preset(group: GroupKind, preset: &Preset) -> Self {
        Self {
            version: PRESET_DOCUMENT_VERSION,
            group: group.name().to_string(),
            name: preset.name.clone(),
            settings: preset.settings.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PresetError::SerializationFailed { reason: e.to_string() }.into())
    }

    /// Parse and validate a document without touching any settings
    pub fn from_json(content: &str) -> Result<Self> {
        let document: PresetDocument = serde_json::from_str(content)
            .map_err(|e| PresetError::InvalidDocument { details: e.to_string() })?;
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > PRESET_DOCUMENT_VERSION {
            return Err(PresetError::UnsupportedVersion { version: self.version }.into());
        }
        if self.name.trim().is_empty() {
            return Err(PresetError::InvalidDocument { details: "empty preset name".to_string() }.into());
        }
        Ok(())
    }

    pub fn group_kind(&self) -> Result<GroupKind> {
        GroupKind::from_name(&self.group)
    }
}

/// Keep only the numeric values of a JSON object
pub(crate) fn numeric_entries<'de, D>(deserializer: D) -> std::result::Result<SettingsMap, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
        .collect())
}

/// `preset-<base36 millis>-<4 random base36 chars>`
pub fn generate_preset_id<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> String {
    let millis = now.timestamp_millis().max(0) as u64;
    let suffix: String = (0..4).map(|_| BASE36[rng.gen_range(0..36)] as char).collect();
    format!("preset-{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Presets shipped with each group
pub fn built_in_presets(group: GroupKind) -> Vec<Preset> {
    match group {
        GroupKind::CanonOverlay => vec![Preset::shipped("canon-legacy-default", "Legacy Default", group.defaults())],
        GroupKind::EternalLoop => {
            let labyrinth: SettingsMap = [
                ("musicality", 60.0),
                ("minLoopBeats", 8.0),
                ("maxSequentialBeats", 28.0),
                ("loopThreshold", 0.5),
                ("sectionBias", 0.55),
                ("jumpVariance", 0.5),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            vec![
                Preset::shipped("eternal-improved-default", "Default", group.defaults()),
                Preset::shipped("eternal-labyrinth", "Labyrinth", labyrinth),
            ]
        }
        GroupKind::EternalOverlay | GroupKind::JukeboxLoop => Vec::new(),
    }
}
