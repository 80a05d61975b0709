use thiserror::Error;

/// Main error type for the beat remix engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Analysis ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Preset error: {0}")]
    Preset(#[from] PresetError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Analysis document errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to parse analysis document: {reason}")]
    ParseFailed { reason: String },

    #[error("Invalid analysis document: {details}")]
    InvalidDocument { details: String },
}

/// Settings lookup errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Unknown settings group: {name}")]
    UnknownGroup { name: String },

    #[error("Unknown mode: {name}")]
    UnknownMode { name: String },
}

/// Preset-specific errors
#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Preset not found: {group}/{id}")]
    NotFound { group: String, id: String },

    #[error("Invalid preset document: {details}")]
    InvalidDocument { details: String },

    #[error("Built-in preset cannot be modified: {id}")]
    ReadOnly { id: String },

    #[error("Unsupported preset document version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("Preset serialization failed: {reason}")]
    SerializationFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            // A missing preset may simply not have been saved yet
            Self::Preset(PresetError::NotFound { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Settings(SettingsError::UnknownGroup { name }) => {
                format!(
                    "Settings group '{}' does not exist. Available groups: canonOverlay, eternalOverlay, jukeboxLoop, eternalLoop",
                    name
                )
            }
            Self::Preset(PresetError::NotFound { group, id }) => {
                format!("Preset '{}' was not found in group '{}'.", id, group)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_unknown_group() {
        let err: EngineError = SettingsError::UnknownGroup { name: "bogus".to_string() }.into();
        assert!(err.user_message().contains("canonOverlay"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_missing_preset_is_recoverable() {
        let err: EngineError = PresetError::NotFound {
            group: "jukeboxLoop".to_string(),
            id: "preset-x".to_string(),
        }
        .into();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Preset error: Preset not found: jukeboxLoop/preset-x");
    }
}
