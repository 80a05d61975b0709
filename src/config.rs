use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for the remix engine
///
/// Every field has a default matching the tuned constants of the engine, so an
/// empty TOML document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Beat similarity scoring
    pub similarity: SimilarityConfig,

    /// Overlay (canon) mapping
    pub overlay: OverlayConfig,

    /// Loop graph construction
    pub loops: LoopConfig,

    /// Debounce delays for slider-driven recomputes
    pub debounce: DebounceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: EngineConfig = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| ConfigError::ParseFailed { path: format!("<inline>: {}", e) })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.similarity.validate()?;
        self.overlay.validate()?;
        self.loops.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}

/// Per-feature weights of the sub-segment distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub timbre: f64,
    pub pitch: f64,
    pub loudness_start: f64,
    pub loudness_max: f64,
    /// Dominant weight
    pub duration: f64,
    pub confidence: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            timbre: 1.0,
            pitch: 10.0,
            loudness_start: 1.0,
            loudness_max: 1.0,
            duration: 100.0,
            confidence: 1.0,
        }
    }
}

/// Beat similarity scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub weights: FeatureWeights,

    /// Distance charged for a sub-segment the candidate beat does not have
    pub missing_segment_distance: f64,

    /// Added when the two beats belong to different sections
    pub section_penalty: f64,

    /// Scale of the |Δstart| / track duration penalty
    pub time_penalty_scale: f64,

    /// Index distance under which the flow penalty applies
    pub flow_window: usize,

    /// Penalty per index step inside the flow window
    pub flow_penalty: f64,

    /// Replaces non-finite distances
    pub sentinel_distance: f64,

    /// Neighbor cap in normal mode
    pub max_neighbors: usize,

    /// Neighbor cap when the canon overlay is advanced-enabled
    pub max_neighbors_advanced: usize,

    /// Good neighbors lie within best distance + margin
    pub good_neighbor_margin: f64,

    /// Number of closest candidates kept when no good neighbor shares the section
    pub good_neighbor_fallback: usize,

    /// Loop candidate edge → distance conversion: base + (1 - sim) * scale, floored
    pub loop_edge_base: f64,
    pub loop_edge_scale: f64,
    pub loop_edge_floor: f64,

    /// Loop candidates kept per source beat
    pub loop_candidates_per_beat: usize,

    /// Caps after merging base-alignment edges into the neighbor lists
    pub augmented_max_neighbors: usize,
    pub augmented_max_good_neighbors: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weights: FeatureWeights::default(),
            missing_segment_distance: 100.0,
            section_penalty: 420.0,
            time_penalty_scale: 70.0,
            flow_window: 5,
            flow_penalty: 22.0,
            sentinel_distance: 1000.0,
            max_neighbors: 10,
            max_neighbors_advanced: 20,
            good_neighbor_margin: 28.0,
            good_neighbor_fallback: 6,
            loop_edge_base: 14.0,
            loop_edge_scale: 140.0,
            loop_edge_floor: 4.0,
            loop_candidates_per_beat: 16,
            augmented_max_neighbors: 12,
            augmented_max_good_neighbors: 8,
        }
    }
}

impl SimilarityConfig {
    fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (key, value) in [
            ("similarity.weights.timbre", w.timbre),
            ("similarity.weights.pitch", w.pitch),
            ("similarity.weights.loudness_start", w.loudness_start),
            ("similarity.weights.loudness_max", w.loudness_max),
            ("similarity.weights.duration", w.duration),
            ("similarity.weights.confidence", w.confidence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, value).into());
            }
        }

        if self.max_neighbors == 0 || self.max_neighbors_advanced == 0 {
            return Err(invalid(
                "similarity.max_neighbors",
                format!("{}/{}", self.max_neighbors, self.max_neighbors_advanced),
            )
            .into());
        }

        if !self.sentinel_distance.is_finite() || self.sentinel_distance <= 0.0 {
            return Err(invalid("similarity.sentinel_distance", self.sentinel_distance).into());
        }

        if self.good_neighbor_margin < 0.0 {
            return Err(invalid("similarity.good_neighbor_margin", self.good_neighbor_margin).into());
        }

        Ok(())
    }
}

/// Overlay mapping configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Enrichment only touches the middle of the track
    pub enrich_start_frac: f64,
    pub enrich_end_frac: f64,

    /// Neighbors further than this are never used for an enrichment run
    pub enrich_max_distance: f64,

    /// Window of the per-beat volume median
    pub volume_median_window: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enrich_start_frac: 0.22,
            enrich_end_frac: 0.88,
            enrich_max_distance: 70.0,
            volume_median_window: 20,
        }
    }
}

impl OverlayConfig {
    fn validate(&self) -> Result<()> {
        let frac_ok = |f: f64| (0.0..=1.0).contains(&f);
        if !frac_ok(self.enrich_start_frac)
            || !frac_ok(self.enrich_end_frac)
            || self.enrich_start_frac >= self.enrich_end_frac
        {
            return Err(invalid(
                "overlay.enrich_window",
                format!("{}-{}", self.enrich_start_frac, self.enrich_end_frac),
            )
            .into());
        }

        if self.volume_median_window == 0 {
            return Err(invalid("overlay.volume_median_window", self.volume_median_window).into());
        }

        Ok(())
    }
}

/// Loop graph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Number of loop edges handed to the visualizer
    pub visualization_edge_limit: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { visualization_edge_limit: 80 }
    }
}

impl LoopConfig {
    fn validate(&self) -> Result<()> {
        if self.visualization_edge_limit == 0 {
            return Err(invalid("loops.visualization_edge_limit", 0).into());
        }
        Ok(())
    }
}

/// Debounce delays in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub canon_overlay_ms: u64,
    pub eternal_overlay_ms: u64,
    pub loop_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            canon_overlay_ms: 120,
            eternal_overlay_ms: 150,
            loop_ms: 150,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("engine.toml");

        let mut original = EngineConfig::default();
        original.similarity.section_penalty = 300.0;
        original.debounce.loop_ms = 90;

        original.save_to_file(&file_path).unwrap();
        let loaded = EngineConfig::from_file(&file_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            "[similarity]\nmax_neighbors = 12\n\n[debounce]\ncanon_overlay_ms = 100\n",
        )
        .unwrap();
        assert_eq!(config.similarity.max_neighbors, 12);
        assert_eq!(config.similarity.max_neighbors_advanced, 20);
        assert_eq!(config.debounce.canon_overlay_ms, 100);
        assert_eq!(config.debounce.eternal_overlay_ms, 150);
    }

    #[test]
    fn test_inverted_enrich_window_is_rejected() {
        let mut config = EngineConfig::default();
        config.overlay.enrich_start_frac = 0.9;
        config.overlay.enrich_end_frac = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let mut config = EngineConfig::default();
        config.similarity.weights.pitch = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(
            result,
            Err(crate::error::EngineError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
