use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};
use crate::settings::GroupKind;

/// Playback mode of the surrounding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Linear playback with an offset overlay voice
    #[default]
    Canon,
    /// Overlay voice plus loop jumps
    Eternal,
    /// Loop jumps only; the overlay is silent
    Jukebox,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Canon, Mode::Eternal, Mode::Jukebox];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Canon => "canon",
            Self::Eternal => "eternal",
            Self::Jukebox => "jukebox",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| SettingsError::UnknownMode { name: name.to_string() }.into())
    }

    /// Group that tunes the overlay in this mode
    pub fn overlay_group(&self) -> Option<GroupKind> {
        match self {
            Self::Canon => Some(GroupKind::CanonOverlay),
            Self::Eternal => Some(GroupKind::EternalOverlay),
            Self::Jukebox => None,
        }
    }

    /// Group that tunes the loop graph in this mode
    pub fn loop_group(&self) -> Option<GroupKind> {
        match self {
            Self::Canon => None,
            Self::Eternal => Some(GroupKind::EternalLoop),
            Self::Jukebox => Some(GroupKind::JukeboxLoop),
        }
    }

    pub fn uses_group(&self, group: GroupKind) -> bool {
        self.overlay_group() == Some(group) || self.loop_group() == Some(group)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(Mode::from_name("Eternal").unwrap(), Mode::Eternal);
        assert_eq!(Mode::from_name(" jukebox ").unwrap(), Mode::Jukebox);
        assert!(Mode::from_name("karaoke").is_err());
    }

    #[test]
    fn test_groups_per_mode() {
        assert!(Mode::Eternal.uses_group(GroupKind::EternalLoop));
        assert!(Mode::Eternal.uses_group(GroupKind::EternalOverlay));
        assert!(!Mode::Canon.uses_group(GroupKind::JukeboxLoop));
        assert_eq!(Mode::Jukebox.overlay_group(), None);
    }
}
