use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};

/// Field name → value of one settings group
pub type SettingsMap = BTreeMap<String, f64>;

/// The four tunable parameter groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupKind {
    #[serde(rename = "canonOverlay")]
    CanonOverlay,
    #[serde(rename = "eternalOverlay")]
    EternalOverlay,
    #[serde(rename = "jukeboxLoop")]
    JukeboxLoop,
    #[serde(rename = "eternalLoop")]
    EternalLoop,
}

impl GroupKind {
    pub const ALL: [GroupKind; 4] = [
        GroupKind::CanonOverlay,
        GroupKind::EternalOverlay,
        GroupKind::JukeboxLoop,
        GroupKind::EternalLoop,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CanonOverlay => "canonOverlay",
            Self::EternalOverlay => "eternalOverlay",
            Self::JukeboxLoop => "jukeboxLoop",
            Self::EternalLoop => "eternalLoop",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| SettingsError::UnknownGroup { name: name.to_string() }.into())
    }

    pub fn is_overlay(&self) -> bool {
        matches!(self, Self::CanonOverlay | Self::EternalOverlay)
    }

    pub fn is_loop(&self) -> bool {
        !self.is_overlay()
    }

    /// Field definitions of this group, in display order
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::CanonOverlay => &CANON_OVERLAY_FIELDS,
            Self::EternalOverlay => &ETERNAL_OVERLAY_FIELDS,
            Self::JukeboxLoop => &JUKEBOX_LOOP_FIELDS,
            Self::EternalLoop => &ETERNAL_LOOP_FIELDS,
        }
    }

    pub fn field(&self, key: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.key == key)
    }

    /// Factory defaults
    pub fn defaults(&self) -> SettingsMap {
        self.fields().iter().map(|f| (f.key.to_string(), f.default)).collect()
    }

    pub fn default_of(&self, key: &str) -> Option<f64> {
        self.field(key).map(|f| f.default)
    }

    /// Beat-count fields that follow the time-signature grid when rounding is on
    pub fn roundable_fields(&self) -> &'static [&'static str] {
        if self.is_overlay() {
            &["minOffsetBeats", "maxOffsetBeats", "dwellBeats"]
        } else {
            &["minLoopBeats", "maxSequentialBeats"]
        }
    }

    pub fn is_roundable(&self, key: &str) -> bool {
        self.roundable_fields().contains(&key)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Valid domain and default of one numeric field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    /// Integer fields are rounded after clamping
    pub integer: bool,
}

impl FieldSpec {
    const fn int(key: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self { key, default, min, max, integer: true }
    }

    const fn real(key: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self { key, default, min, max, integer: false }
    }

    /// Coerce any value into the domain. NaN keeps `current`.
    pub fn coerce(&self, value: f64, current: f64) -> f64 {
        let value = if value.is_nan() { current } else { value };
        let value = if self.integer { value.round() } else { value };
        value.clamp(self.min, self.max)
    }
}

const MAX_BEATS: f64 = 4096.0;

const CANON_OVERLAY_FIELDS: [FieldSpec; 7] = [
    FieldSpec::int("musicality", 65.0, 0.0, 100.0),
    FieldSpec::int("minOffsetBeats", 8.0, 1.0, MAX_BEATS - 1.0),
    FieldSpec::int("maxOffsetBeats", 64.0, 2.0, MAX_BEATS),
    FieldSpec::int("dwellBeats", 6.0, 1.0, 64.0),
    FieldSpec::int("density", 2.0, 1.0, 16.0),
    FieldSpec::int("jumpBubbleBeats", 8.0, 0.0, 64.0),
    FieldSpec::int("variation", 2.0, 0.0, 50.0),
];

const ETERNAL_OVERLAY_FIELDS: [FieldSpec; 7] = [
    FieldSpec::int("musicality", 60.0, 0.0, 100.0),
    FieldSpec::int("minOffsetBeats", 8.0, 1.0, MAX_BEATS - 1.0),
    FieldSpec::int("maxOffsetBeats", 64.0, 2.0, MAX_BEATS),
    FieldSpec::int("dwellBeats", 6.0, 1.0, 64.0),
    FieldSpec::int("density", 2.0, 1.0, 16.0),
    FieldSpec::int("jumpBubbleBeats", 8.0, 0.0, 64.0),
    FieldSpec::int("variation", 2.0, 0.0, 50.0),
];

const JUKEBOX_LOOP_FIELDS: [FieldSpec; 6] = [
    FieldSpec::int("musicality", 55.0, 0.0, 100.0),
    FieldSpec::int("minLoopBeats", 12.0, 4.0, MAX_BEATS - 2.0),
    FieldSpec::int("maxSequentialBeats", 36.0, 6.0, MAX_BEATS),
    FieldSpec::real("loopThreshold", 0.55, 0.05, 0.99),
    FieldSpec::real("sectionBias", 0.6, 0.0, 1.0),
    FieldSpec::real("jumpVariance", 0.4, 0.0, 1.0),
];

const ETERNAL_LOOP_FIELDS: [FieldSpec; 6] = [
    FieldSpec::int("musicality", 100.0, 0.0, 100.0),
    FieldSpec::int("minLoopBeats", 12.0, 4.0, MAX_BEATS - 2.0),
    FieldSpec::int("maxSequentialBeats", 90.0, 6.0, MAX_BEATS),
    FieldSpec::real("loopThreshold", 0.76, 0.05, 0.99),
    FieldSpec::real("sectionBias", 0.2, 0.0, 1.0),
    FieldSpec::real("jumpVariance", 0.65, 0.0, 1.0),
];

/// Round to the nearest multiple of `grid`, never below one beat
pub fn quantize_beats(value: f64, grid: u32) -> f64 {
    let grid = f64::from(grid.max(1));
    ((value / grid).round() * grid).max(1.0)
}

/// Clamp every known field, fill missing ones, enforce cross-field rules
///
/// Unknown keys are dropped. The result is always a complete, valid map.
pub fn sanitize(group: GroupKind, values: &SettingsMap) -> SettingsMap {
    let mut out = SettingsMap::new();
    for spec in group.fields() {
        let value = match values.get(spec.key) {
            Some(v) => spec.coerce(*v, spec.default),
            None => spec.default,
        };
        out.insert(spec.key.to_string(), value);
    }

    if group.is_overlay() {
        enforce_gap(&mut out, group, "minOffsetBeats", "maxOffsetBeats", 1.0);
    } else {
        // An unset maximum follows the minimum instead of a fixed default
        if !values.contains_key("maxSequentialBeats") {
            let min = out["minLoopBeats"];
            out.insert("maxSequentialBeats".to_string(), (min + 4.0).max(min * 3.0).min(MAX_BEATS));
        }
        enforce_gap(&mut out, group, "minLoopBeats", "maxSequentialBeats", 2.0);
    }
    out
}

/// Keep `values[max_key] >= values[min_key] + gap`, raising the maximum first
fn enforce_gap(values: &mut SettingsMap, group: GroupKind, min_key: &str, max_key: &str, gap: f64) {
    let (Some(min_spec), Some(max_spec)) = (group.field(min_key), group.field(max_key)) else {
        return;
    };
    let min = values.get(min_key).copied().unwrap_or(min_spec.default);
    let max = values.get(max_key).copied().unwrap_or(max_spec.default);
    if max >= min + gap {
        return;
    }
    let raised = (min + gap).min(max_spec.max);
    values.insert(max_key.to_string(), raised);
    if raised < min + gap {
        values.insert(min_key.to_string(), (raised - gap).max(min_spec.min));
    }
}

/// Merge `incoming` over `current`: known keys are clamped, unknown keys ignored
///
/// Returns the merged map and the ignored keys.
pub fn merge(group: GroupKind, current: &SettingsMap, incoming: &SettingsMap) -> (SettingsMap, Vec<String>) {
    let mut merged = current.clone();
    let mut ignored = Vec::new();
    for (key, value) in incoming {
        match group.field(key) {
            Some(spec) => {
                let previous = current.get(key).copied().unwrap_or(spec.default);
                merged.insert(key.clone(), spec.coerce(*value, previous));
            }
            None => ignored.push(key.clone()),
        }
    }
    (sanitize(group, &merged), ignored)
}
