use tracing::debug;

use crate::graph::loops::{LoopGraph, LoopSettings};

/// Playback collaborator that consumes loop settings and overlay flags
///
/// Every method is optional: the default implementations report the
/// capability as missing by returning `false`, and the engine simply skips
/// that field. Drivers override only what they support.
pub trait PlaybackDriver {
    /// Returns a short name used in log output
    fn name(&self) -> &str {
        "driver"
    }

    fn set_min_loop_beats(&mut self, beats: usize) -> bool {
        let _ = beats;
        false
    }

    fn set_max_sequential_beats(&mut self, beats: usize) -> bool {
        let _ = beats;
        false
    }

    fn set_loop_similarity_threshold(&mut self, threshold: f64) -> bool {
        let _ = threshold;
        false
    }

    fn set_loop_section_bias(&mut self, bias: f64) -> bool {
        let _ = bias;
        false
    }

    fn set_loop_jump_variance(&mut self, variance: f64) -> bool {
        let _ = variance;
        false
    }

    /// Rebuild the driver's jump schedule from freshly validated settings
    fn recompute_loop_graph(&mut self, settings: &LoopSettings, graph: &LoopGraph) -> bool {
        let _ = (settings, graph);
        false
    }

    /// Redraw loop connections
    fn refresh_visualization(&mut self) -> bool {
        false
    }

    /// Silence the overlay voice without touching the mapping
    fn set_overlay_muted(&mut self, muted: bool) -> bool {
        let _ = muted;
        false
    }
}

/// Driver with no capabilities, used until a real one is attached
#[derive(Debug, Default)]
pub struct NullDriver;

impl PlaybackDriver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }
}

/// Which setters a driver accepted during one forwarding pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

impl ForwardReport {
    fn record(&mut self, field: &'static str, applied: bool) {
        if applied {
            self.applied.push(field);
        } else {
            self.skipped.push(field);
        }
    }
}

/// Push validated loop settings to the driver, then recompute and redraw
pub fn forward_loop_settings(
    driver: &mut dyn PlaybackDriver,
    settings: &LoopSettings,
    graph: &LoopGraph,
) -> ForwardReport {
    let mut report = ForwardReport::default();
    report.record("minLoopBeats", driver.set_min_loop_beats(settings.min_loop_beats));
    report.record("maxSequentialBeats", driver.set_max_sequential_beats(settings.max_sequential_beats));
    report.record("loopThreshold", driver.set_loop_similarity_threshold(settings.loop_threshold));
    report.record("sectionBias", driver.set_loop_section_bias(settings.section_bias));
    report.record("jumpVariance", driver.set_loop_jump_variance(settings.jump_variance));
    report.record("recomputeLoopGraph", driver.recompute_loop_graph(settings, graph));
    report.record("refreshVisualization", driver.refresh_visualization());

    if !report.skipped.is_empty() {
        debug!("Driver '{}' lacks: {}", driver.name(), report.skipped.join(", "));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::schema::GroupKind;

    #[derive(Default)]
    struct ThresholdOnly {
        threshold: Option<f64>,
        recomputes: usize,
    }

    impl PlaybackDriver for ThresholdOnly {
        fn set_loop_similarity_threshold(&mut self, threshold: f64) -> bool {
            self.threshold = Some(threshold);
            true
        }

        fn recompute_loop_graph(&mut self, _settings: &LoopSettings, _graph: &LoopGraph) -> bool {
            self.recomputes += 1;
            true
        }
    }

    #[test]
    fn test_missing_setters_are_skipped() {
        let mut driver = ThresholdOnly::default();
        let settings = LoopSettings::defaults(GroupKind::EternalLoop);
        let report = forward_loop_settings(&mut driver, &settings, &LoopGraph::default());

        assert_eq!(driver.threshold, Some(0.76));
        assert_eq!(driver.recomputes, 1);
        assert_eq!(report.applied, vec!["loopThreshold", "recomputeLoopGraph"]);
        assert!(report.skipped.contains(&"minLoopBeats"));
    }

    #[test]
    fn test_null_driver_applies_nothing() {
        let settings = LoopSettings::defaults(GroupKind::JukeboxLoop);
        let report = forward_loop_settings(&mut NullDriver, &settings, &LoopGraph::default());
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 7);
    }
}
