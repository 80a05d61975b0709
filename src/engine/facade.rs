use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisIngest, BeatIndex, Track, TrackAnalysis};
use crate::config::EngineConfig;
use crate::engine::Mode;
use crate::error::Result;
use crate::graph::{
    forward_loop_settings, LoopEdge, LoopGraph, LoopGraphBuilder, LoopSettings, Neighbor,
    NeighborTable, NullDriver, PlaybackDriver, SimilarityIndex,
};
use crate::overlay::{BaseOutcome, CanonSegmentInfo, OverlayMapper, OverlaySettings, OverlayTarget};
use crate::scheduler::{debounce_delay, Debouncer, Scheduler, SystemScheduler};
use crate::settings::{
    GroupKind, GroupSettingsView, ImportReport, Preset, PresetDocument, SettingsDocument,
    SettingsManager,
};

/// Kind of a drawable edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Loop,
    Overlay,
}

/// Edge handed to the visualizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationEdge {
    pub source: BeatIndex,
    pub target: BeatIndex,
    /// 0..=1; loop similarity or overlay gain
    pub emphasis: f64,
    pub kind: EdgeKind,
}

/// Everything derived from the loaded track
pub struct EngineState {
    generation: u64,
    track: Track,
    neighbors: NeighborTable,
    neighbors_advanced: bool,
    mapper: OverlayMapper,
    jukebox_graph: LoopGraph,
    eternal_graph: LoopGraph,
    drawn_edges: Vec<VisualizationEdge>,
}

impl EngineState {
    /// Identity of the loaded track; bumps on every load
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn mapper(&self) -> &OverlayMapper {
        &self.mapper
    }

    /// Loop graph of a loop group; `None` for overlay groups
    pub fn loop_graph(&self, group: GroupKind) -> Option<&LoopGraph> {
        match group {
            GroupKind::JukeboxLoop => Some(&self.jukebox_graph),
            GroupKind::EternalLoop => Some(&self.eternal_graph),
            _ => None,
        }
    }

    fn set_loop_graph(&mut self, group: GroupKind, graph: LoopGraph) {
        match group {
            GroupKind::JukeboxLoop => self.jukebox_graph = graph,
            GroupKind::EternalLoop => self.eternal_graph = graph,
            _ => {}
        }
    }

    pub fn drawn_edges(&self) -> &[VisualizationEdge] {
        &self.drawn_edges
    }
}

/// Wires ingest, similarity, loop graph, overlay mapping and settings together
///
/// Recomputes are triggered by:
/// 1. Track load - everything is rebuilt for the new track
/// 2. Mode switch - the new mode's overlay and loop groups are reapplied
/// 3. Enable toggle, reset, preset load, rounding - immediate recompute of the group
/// 4. Field edits - debounced, run from [`RemixEngine::poll`]
///
/// Every recompute entry point is a logged no-op until a track is loaded.
pub struct RemixEngine {
    config: EngineConfig,
    ingest: AnalysisIngest,
    similarity: SimilarityIndex,
    loop_builder: LoopGraphBuilder,
    settings: SettingsManager,
    driver: Box<dyn PlaybackDriver>,
    scheduler: Box<dyn Scheduler>,
    debouncer: Debouncer,
    mode: Mode,
    generation: u64,
    state: Option<EngineState>,
}

impl RemixEngine {
    /// Create an engine with the given configuration and collaborators
    pub fn new(config: EngineConfig, driver: Box<dyn PlaybackDriver>, scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            ingest: AnalysisIngest::with_config(&config.similarity),
            similarity: SimilarityIndex::new(config.similarity.clone()),
            loop_builder: LoopGraphBuilder::new(config.loops.clone()),
            settings: SettingsManager::new(),
            driver,
            scheduler,
            debouncer: Debouncer::new(),
            mode: Mode::default(),
            generation: 0,
            state: None,
            config,
        }
    }

    /// Replace the settings store, e.g. one restored by the host application
    pub fn with_settings(mut self, settings: SettingsManager) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn state(&self) -> Option<&EngineState> {
        self.state.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ==========================================
    // TRACK & MODE
    // ==========================================

    /// Ingest an analysis and rebuild everything derived from it
    ///
    /// Recomputes still pending for the previous track are discarded on the
    /// next poll.
    pub fn load_track(&mut self, analysis: TrackAnalysis) -> BaseOutcome {
        self.generation += 1;
        let track = self.ingest.ingest(analysis);
        info!("🎵 Loading track: {} beats, {} sections (generation {})",
              track.len(), track.section_count, self.generation);

        self.settings.set_grid_size(track.grid_size());
        let advanced = self.overlay_advanced();
        let (neighbors, mapper, outcome) = self.build_base(&track, advanced);
        match outcome {
            BaseOutcome::Aligned => info!("   Base alignment applied"),
            BaseOutcome::Folded => warn!("   No usable base alignment, using section fold"),
            BaseOutcome::Degraded => warn!("   Track analysis unusable, overlay silenced"),
        }

        self.state = Some(EngineState {
            generation: self.generation,
            track,
            neighbors,
            neighbors_advanced: advanced,
            mapper,
            jukebox_graph: LoopGraph::default(),
            eternal_graph: LoopGraph::default(),
            drawn_edges: Vec::new(),
        });
        self.refresh_all();
        outcome
    }

    pub fn load_track_json(&mut self, content: &str) -> Result<BaseOutcome> {
        let analysis = TrackAnalysis::from_json(content)?;
        Ok(self.load_track(analysis))
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        let previous = std::mem::replace(&mut self.mode, mode);
        self.debouncer.cancel_mode(previous);
        info!("Mode {} -> {}", previous, mode);

        if self.state.is_none() {
            debug!("No track loaded, mode switch recorded only");
            return;
        }
        self.refresh_active();
    }

    pub fn set_mode_by_name(&mut self, name: &str) -> Result<()> {
        self.set_mode(Mode::from_name(name)?);
        Ok(())
    }

    /// Run debounced recomputes that are due; returns how many ran
    pub fn poll(&mut self) -> usize {
        if self.state.is_none() {
            return 0;
        }
        let due = self.debouncer.take_due(self.scheduler.now_ms(), self.generation);
        for group in &due {
            self.recompute_group(*group);
        }
        due.len()
    }

    /// True while an edit to the group waits for its debounce
    pub fn recompute_pending(&self, group: GroupKind) -> bool {
        self.debouncer.is_pending(group)
    }

    // ==========================================
    // QUERIES
    // ==========================================

    pub fn overlay_target(&self, index: BeatIndex) -> Option<OverlayTarget> {
        self.state.as_ref().and_then(|s| s.mapper.target(index))
    }

    /// Normalized loudness of a beat, 0..=1
    pub fn overlay_volume(&self, index: BeatIndex) -> Option<f64> {
        self.state.as_ref().and_then(|s| s.mapper.volume(index))
    }

    pub fn segment_info(&self, index: BeatIndex) -> Option<&CanonSegmentInfo> {
        self.state.as_ref().and_then(|s| s.mapper.segment_info(index))
    }

    pub fn neighbors(&self, index: BeatIndex) -> &[Neighbor] {
        match &self.state {
            Some(state) => state.neighbors.neighbors(index),
            None => &[],
        }
    }

    pub fn good_neighbors(&self, index: BeatIndex) -> &[Neighbor] {
        match &self.state {
            Some(state) => state.neighbors.good_neighbors(index),
            None => &[],
        }
    }

    /// Outgoing jumps of a beat in the current mode
    pub fn loop_edges(&self, index: BeatIndex) -> Vec<&LoopEdge> {
        match (&self.state, self.mode.loop_group()) {
            (Some(state), Some(group)) => state.loop_graph(group).map(|g| g.edges(index)).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Edges to draw for a mode
    ///
    /// Loop edges come from the mode's loop graph, strongest first. Overlay
    /// edges are included only for the current mode, since the mapping
    /// reflects it alone.
    pub fn visualization_edges(&self, mode: Mode) -> Vec<VisualizationEdge> {
        let Some(state) = &self.state else {
            return Vec::new();
        };

        let mut edges: Vec<VisualizationEdge> = mode
            .loop_group()
            .and_then(|group| state.loop_graph(group))
            .map(|graph| {
                graph
                    .visualization_edges(self.loop_builder.visualization_limit())
                    .into_iter()
                    .map(|edge| VisualizationEdge {
                        source: edge.source,
                        target: edge.target,
                        emphasis: edge.similarity.clamp(0.0, 1.0),
                        kind: EdgeKind::Loop,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if mode == self.mode && mode.overlay_group().is_some() {
            edges.extend(
                state
                    .mapper
                    .targets()
                    .iter()
                    .enumerate()
                    .filter(|(i, t)| t.other != *i && t.gain > 0.0)
                    .map(|(i, t)| VisualizationEdge {
                        source: i,
                        target: t.other,
                        emphasis: t.gain,
                        kind: EdgeKind::Overlay,
                    }),
            );
        }
        edges
    }

    /// Edges drawn by the last recompute of the current mode
    pub fn drawn_edges(&self) -> &[VisualizationEdge] {
        match &self.state {
            Some(state) => state.drawn_edges(),
            None => &[],
        }
    }

    pub fn group_settings(&self, group: GroupKind) -> GroupSettingsView {
        self.settings.view(group)
    }

    // ==========================================
    // CONTROLS
    // ==========================================

    /// Toggle a group; returns true when the flag changed
    ///
    /// Disabling a loop group drops its drawn edges and rebuilds the graph
    /// from the group defaults.
    pub fn set_group_enabled(&mut self, group: GroupKind, enabled: bool) -> bool {
        if !self.settings.set_group_enabled(group, enabled) {
            return false;
        }
        let Some(state) = self.state.as_mut() else {
            debug!("No track loaded, {} toggle stored only", group);
            return true;
        };
        if !enabled && group.is_loop() {
            state.drawn_edges.retain(|e| e.kind != EdgeKind::Loop);
        }
        self.debouncer.cancel(group);

        if group.is_overlay() && self.sync_neighbor_cap() {
            self.refresh_all();
        } else {
            self.recompute_group(group);
        }
        true
    }

    /// Clamp and store a field, then arm the group's debounced recompute
    pub fn update_field(&mut self, group: GroupKind, key: &str, value: f64) -> Option<f64> {
        let stored = self.settings.update_field(group, key, value)?;
        if self.state.is_none() {
            debug!("No track loaded, {}.{} stored without recompute", group, key);
            return Some(stored);
        }
        let due = self.scheduler.now_ms() + debounce_delay(&self.config.debounce, group);
        self.debouncer.schedule(group, due, self.mode, self.generation);
        Some(stored)
    }

    pub fn reset_group(&mut self, group: GroupKind) {
        self.settings.reset_group(group);
        self.recompute_now(group);
    }

    pub fn save_preset(&mut self, group: GroupKind, name: &str) -> Preset {
        self.settings.save_preset(group, name)
    }

    pub fn load_preset(&mut self, group: GroupKind, id: &str) -> Result<()> {
        self.settings.load_preset(group, id)?;
        self.recompute_now(group);
        Ok(())
    }

    pub fn delete_preset(&mut self, group: GroupKind, id: &str) -> Result<Preset> {
        self.settings.delete_preset(group, id)
    }

    pub fn export_preset(&self, group: GroupKind, id: &str) -> Result<PresetDocument> {
        self.settings.export_preset(group, id)
    }

    pub fn import_preset(&mut self, document: &PresetDocument) -> Result<(GroupKind, Preset)> {
        self.settings.import_preset(document)
    }

    pub fn import_preset_json(&mut self, content: &str) -> Result<(GroupKind, Preset)> {
        self.settings.import_preset_json(content)
    }

    /// Toggle beat rounding; every re-quantized group is recomputed
    pub fn set_beat_rounding(&mut self, enabled: bool) -> Vec<GroupKind> {
        let changed = self.settings.set_beat_rounding(enabled);
        for group in &changed {
            self.recompute_now(*group);
        }
        changed
    }

    /// Forwarded to the driver; the mapping is untouched
    pub fn set_overlay_muted(&mut self, muted: bool) {
        self.settings.set_overlay_muted(muted);
        if !self.driver.set_overlay_muted(muted) {
            debug!("Driver '{}' ignores overlay mute", self.driver.name());
        }
    }

    pub fn export_all(&self) -> SettingsDocument {
        self.settings.export_all()
    }

    pub fn import_all(&mut self, document: &SettingsDocument) -> ImportReport {
        let report = self.settings.import_all(document);
        if self.state.is_some() {
            self.debouncer.clear();
            self.sync_neighbor_cap();
            self.refresh_all();
        }
        report
    }

    // ==========================================
    // RECOMPUTE
    // ==========================================

    fn recompute_now(&mut self, group: GroupKind) {
        self.debouncer.cancel(group);
        self.recompute_group(group);
    }

    fn recompute_group(&mut self, group: GroupKind) {
        if self.state.is_none() {
            debug!("No track loaded, recompute of {} skipped", group);
            return;
        }
        if !self.debouncer.begin(group) {
            debug!("Recompute of {} already running, coalesced", group);
            return;
        }
        loop {
            if group.is_overlay() {
                self.regenerate_overlay(group);
            } else {
                self.rebuild_loop_graph(group);
            }
            if !self.debouncer.finish(group) {
                break;
            }
        }
        if self.mode.uses_group(group) {
            self.redraw();
        }
    }

    /// Rebuild loop graphs of inactive modes, then the active mode
    fn refresh_all(&mut self) {
        for group in [GroupKind::JukeboxLoop, GroupKind::EternalLoop] {
            if self.mode.loop_group() != Some(group) {
                self.recompute_group(group);
            }
        }
        self.refresh_active();
    }

    fn refresh_active(&mut self) {
        match self.mode.overlay_group() {
            Some(group) => self.recompute_group(group),
            None => {
                if let Some(state) = self.state.as_mut() {
                    state.mapper.silence();
                }
            }
        }
        if let Some(group) = self.mode.loop_group() {
            self.recompute_group(group);
        }
        self.redraw();
    }

    fn regenerate_overlay(&mut self, group: GroupKind) {
        if self.mode.overlay_group() != Some(group) {
            debug!("{} is not used by {} mode, mapping kept", group, self.mode);
            return;
        }
        let advanced = self
            .settings
            .is_enabled(group)
            .then(|| OverlaySettings::from_values(group, self.settings.values(group)));

        let Some(state) = self.state.as_mut() else { return };
        state.mapper.regenerate(&state.track, &state.neighbors, advanced.as_ref());
        debug!("Overlay recomputed for {} ({:?})", group, state.mapper.phase());
    }

    fn rebuild_loop_graph(&mut self, group: GroupKind) {
        let settings = LoopSettings::from_values(group, &self.settings.effective_values(group));
        let Some(state) = self.state.as_mut() else { return };

        let graph = self.loop_builder.build(&state.track, &state.neighbors, &settings);
        state.set_loop_graph(group, graph);

        if self.mode.loop_group() == Some(group) {
            if let Some(graph) = state.loop_graph(group) {
                let report = forward_loop_settings(self.driver.as_mut(), &settings, graph);
                debug!("Loop settings of {} forwarded ({} applied)", group, report.applied.len());
            }
        }
    }

    fn redraw(&mut self) {
        let edges = self.visualization_edges(self.mode);
        if let Some(state) = self.state.as_mut() {
            state.drawn_edges = edges;
        }
    }

    /// True when any overlay group wants the wider neighbor lists
    fn overlay_advanced(&self) -> bool {
        GroupKind::ALL.into_iter().any(|g| g.is_overlay() && self.settings.is_enabled(g))
    }

    /// Rebuild neighbors and base when the neighbor cap no longer matches;
    /// returns true when it did
    fn sync_neighbor_cap(&mut self) -> bool {
        let advanced = self.overlay_advanced();
        let Some(state) = self.state.take() else {
            return false;
        };
        if state.neighbors_advanced == advanced {
            self.state = Some(state);
            return false;
        }

        debug!("Rebuilding neighbor lists (advanced = {})", advanced);
        let (neighbors, mapper, _) = self.build_base(&state.track, advanced);
        self.state = Some(EngineState { neighbors, mapper, neighbors_advanced: advanced, ..state });
        true
    }

    fn build_base(&self, track: &Track, advanced: bool) -> (NeighborTable, OverlayMapper, BaseOutcome) {
        let mut neighbors = self.similarity.build(track, advanced);
        let mut mapper = OverlayMapper::new(self.config.overlay.clone());
        let outcome = mapper.initialize(track, &neighbors);

        if outcome == BaseOutcome::Aligned {
            if let Some(alignment) = &track.base_alignment {
                self.similarity.augment_with_alignment(track, &mut neighbors, alignment);
            }
        }
        (neighbors, mapper, outcome)
    }
}

impl Default for RemixEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Box::new(NullDriver), Box::new(SystemScheduler::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::BaseAlignment;
    use crate::scheduler::ManualScheduler;
    use crate::test_support::{init_logging, periodic_analysis, uniform_analysis};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct DriverLog {
        loop_recomputes: usize,
        thresholds: Vec<f64>,
        muted: Option<bool>,
    }

    struct RecordingDriver(Rc<RefCell<DriverLog>>);

    impl PlaybackDriver for RecordingDriver {
        fn set_loop_similarity_threshold(&mut self, threshold: f64) -> bool {
            self.0.borrow_mut().thresholds.push(threshold);
            true
        }

        fn recompute_loop_graph(&mut self, _settings: &LoopSettings, _graph: &LoopGraph) -> bool {
            self.0.borrow_mut().loop_recomputes += 1;
            true
        }

        fn set_overlay_muted(&mut self, muted: bool) -> bool {
            self.0.borrow_mut().muted = Some(muted);
            true
        }
    }

    fn engine() -> (RemixEngine, ManualScheduler, Rc<RefCell<DriverLog>>) {
        init_logging();
        let clock = ManualScheduler::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let engine = RemixEngine::new(
            EngineConfig::default(),
            Box::new(RecordingDriver(log.clone())),
            Box::new(clock.clone()),
        );
        (engine, clock, log)
    }

    fn loop_pairs(edges: &[VisualizationEdge]) -> Vec<(BeatIndex, BeatIndex)> {
        edges.iter().filter(|e| e.kind == EdgeKind::Loop).map(|e| (e.source, e.target)).collect()
    }

    #[test]
    fn test_calls_before_load_are_noops() {
        let (mut engine, clock, log) = engine();

        assert_eq!(engine.overlay_target(0), None);
        assert!(engine.neighbors(0).is_empty());
        assert_eq!(engine.update_field(GroupKind::JukeboxLoop, "loopThreshold", 0.6), Some(0.6));
        assert!(!engine.recompute_pending(GroupKind::JukeboxLoop));

        engine.set_mode(Mode::Jukebox);
        engine.reset_group(GroupKind::JukeboxLoop);
        clock.advance(1000);
        assert_eq!(engine.poll(), 0);
        assert!(engine.visualization_edges(Mode::Jukebox).is_empty());
        assert_eq!(log.borrow().loop_recomputes, 0);
    }

    #[test]
    fn test_every_beat_has_a_target_in_every_mode() {
        let (mut engine, _clock, _log) = engine();
        engine.load_track(periodic_analysis(64, 4, 8));
        for group in GroupKind::ALL {
            engine.set_group_enabled(group, true);
        }

        for mode in [Mode::Eternal, Mode::Jukebox, Mode::Canon] {
            engine.set_mode(mode);
            for i in 0..64 {
                let target = engine.overlay_target(i).unwrap();
                assert!(target.other < 64);
                assert!((0.0..=1.0).contains(&target.gain), "beat {} gain {}", i, target.gain);
            }
        }
    }

    #[test]
    fn test_offset_bounds_after_debounced_edits() {
        let (mut engine, clock, _log) = engine();
        engine.load_track(periodic_analysis(128, 4, 8));
        engine.set_group_enabled(GroupKind::CanonOverlay, true);

        assert_eq!(engine.update_field(GroupKind::CanonOverlay, "minOffsetBeats", 8.0), Some(8.0));
        assert_eq!(engine.update_field(GroupKind::CanonOverlay, "maxOffsetBeats", 32.0), Some(32.0));
        clock.advance(120);
        assert_eq!(engine.poll(), 1);

        for i in 0..128 {
            let target = engine.overlay_target(i).unwrap();
            let magnitude = i.abs_diff(target.other);
            assert!((8..=32).contains(&magnitude), "beat {} offset {}", i, magnitude);
        }
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (mut engine, _clock, _log) = engine();
        engine.load_track(periodic_analysis(96, 3, 8));
        engine.set_group_enabled(GroupKind::CanonOverlay, true);
        let first: Vec<OverlayTarget> = (0..96).filter_map(|i| engine.overlay_target(i)).collect();

        engine.set_mode(Mode::Eternal);
        engine.set_mode(Mode::Canon);
        engine.reset_group(GroupKind::CanonOverlay);
        let second: Vec<OverlayTarget> = (0..96).filter_map(|i| engine.overlay_target(i)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clamping_and_beat_rounding() {
        let (mut engine, _clock, _log) = engine();
        engine.load_track(periodic_analysis(32, 1, 8));
        assert_eq!(engine.settings().grid_size(), 4);

        assert_eq!(engine.update_field(GroupKind::JukeboxLoop, "loopThreshold", 5.0), Some(0.99));
        assert_eq!(engine.update_field(GroupKind::JukeboxLoop, "loopThreshold", -1.0), Some(0.05));

        engine.set_beat_rounding(true);
        assert_eq!(engine.update_field(GroupKind::CanonOverlay, "minOffsetBeats", 10.0), Some(12.0));
    }

    #[test]
    fn test_new_edit_restarts_debounce() {
        let (mut engine, clock, log) = engine();
        engine.load_track(periodic_analysis(64, 2, 8));
        engine.set_mode(Mode::Eternal);
        engine.set_group_enabled(GroupKind::EternalLoop, true);
        let before = log.borrow().loop_recomputes;

        engine.update_field(GroupKind::EternalLoop, "loopThreshold", 0.8);
        clock.advance(100);
        engine.update_field(GroupKind::EternalLoop, "loopThreshold", 0.85);
        clock.advance(100);
        assert_eq!(engine.poll(), 0);
        assert_eq!(log.borrow().loop_recomputes, before);

        clock.advance(50);
        assert_eq!(engine.poll(), 1);
        assert_eq!(log.borrow().loop_recomputes, before + 1);
        assert_eq!(log.borrow().thresholds.last(), Some(&0.85));
    }

    #[test]
    fn test_pending_recompute_for_previous_track_is_discarded() {
        let (mut engine, clock, log) = engine();
        engine.load_track(periodic_analysis(64, 2, 8));
        engine.set_mode(Mode::Eternal);
        engine.set_group_enabled(GroupKind::EternalLoop, true);
        engine.update_field(GroupKind::EternalLoop, "loopThreshold", 0.8);

        engine.load_track(periodic_analysis(48, 2, 8));
        let after_load = log.borrow().loop_recomputes;
        clock.advance(500);
        assert_eq!(engine.poll(), 0);
        assert_eq!(log.borrow().loop_recomputes, after_load);
        assert!(!engine.recompute_pending(GroupKind::EternalLoop));
        assert_eq!(engine.state().unwrap().generation(), 2);
    }

    #[test]
    fn test_mode_switch_cancels_pending_edits() {
        let (mut engine, clock, _log) = engine();
        engine.load_track(periodic_analysis(64, 2, 8));
        engine.set_mode(Mode::Eternal);
        engine.update_field(GroupKind::EternalOverlay, "dwellBeats", 6.0);
        assert!(engine.recompute_pending(GroupKind::EternalOverlay));

        engine.set_mode(Mode::Jukebox);
        assert!(!engine.recompute_pending(GroupKind::EternalOverlay));
        clock.advance(500);
        assert_eq!(engine.poll(), 0);
    }

    #[test]
    fn test_disabling_eternal_loop_redraws_default_edges() {
        let (mut engine, clock, _log) = engine();
        engine.load_track(periodic_analysis(96, 3, 8));
        engine.set_mode(Mode::Eternal);
        engine.set_group_enabled(GroupKind::EternalLoop, true);
        engine.update_field(GroupKind::EternalLoop, "minLoopBeats", 24.0);
        engine.update_field(GroupKind::EternalLoop, "loopThreshold", 0.9);
        clock.advance(200);
        assert_eq!(engine.poll(), 1);

        engine.set_group_enabled(GroupKind::EternalLoop, false);

        let state = engine.state().unwrap();
        let defaults = LoopSettings::defaults(GroupKind::EternalLoop);
        let expected_graph = LoopGraphBuilder::default().build(state.track(), state.neighbors(), &defaults);
        let expected: Vec<(BeatIndex, BeatIndex)> = expected_graph
            .visualization_edges(80)
            .iter()
            .map(|e| (e.source, e.target))
            .collect();

        assert_eq!(loop_pairs(engine.drawn_edges()), expected);
        assert_eq!(loop_pairs(&engine.visualization_edges(Mode::Eternal)), expected);
    }

    #[test]
    fn test_uniform_track_overlay_never_maps_to_self() {
        let (mut engine, clock, _log) = engine();
        engine.load_track(uniform_analysis(4));

        let good: Vec<BeatIndex> = engine.good_neighbors(0).iter().map(|n| n.index).collect();
        for expected in 1..4 {
            assert!(good.contains(&expected), "beat {} missing from {:?}", expected, good);
        }

        engine.set_group_enabled(GroupKind::CanonOverlay, true);
        engine.update_field(GroupKind::CanonOverlay, "minOffsetBeats", 1.0);
        clock.advance(120);
        engine.poll();

        for i in 0..4 {
            let target = engine.overlay_target(i).unwrap();
            assert_ne!(target.other, i);
        }
    }

    #[test]
    fn test_short_alignment_folds_by_section() {
        let (mut engine, _clock, _log) = engine();
        let mut doc = periodic_analysis(64, 4, 8);
        doc.base_alignment = Some(BaseAlignment {
            pairs: (0..40).map(|i| Some((i + 8) % 40)).collect(),
            pair_similarity: vec![0.9; 40],
            ..Default::default()
        });

        assert_eq!(engine.load_track(doc), BaseOutcome::Folded);
        let track = engine.state().unwrap().track().clone();
        for i in 0..64 {
            let target = engine.overlay_target(i).unwrap();
            assert!(track.sections_adjacent(i, target.other), "beat {} -> {}", i, target.other);
            assert!(target.gain <= 0.9);
        }
    }

    #[test]
    fn test_preset_roundtrip_through_engine() {
        let (mut engine, _clock, _log) = engine();
        engine.load_track(periodic_analysis(32, 1, 8));
        engine.update_field(GroupKind::EternalOverlay, "dwellBeats", 9.0);
        engine.update_field(GroupKind::EternalOverlay, "variation", 17.0);
        let snapshot = engine.settings().values(GroupKind::EternalOverlay).clone();

        let saved = engine.save_preset(GroupKind::EternalOverlay, "Wide");
        let json = engine.export_preset(GroupKind::EternalOverlay, &saved.id).unwrap().to_json().unwrap();
        let (group, imported) = engine.import_preset_json(&json).unwrap();
        assert_eq!(group, GroupKind::EternalOverlay);

        engine.reset_group(GroupKind::EternalOverlay);
        assert_ne!(engine.settings().values(GroupKind::EternalOverlay), &snapshot);
        engine.load_preset(GroupKind::EternalOverlay, &imported.id).unwrap();
        assert_eq!(engine.settings().values(GroupKind::EternalOverlay), &snapshot);
    }

    #[test]
    fn test_jukebox_silences_overlay_and_mute_is_forwarded() {
        let (mut engine, _clock, log) = engine();
        engine.load_track(periodic_analysis(48, 2, 8));
        let canon: Vec<OverlayTarget> = (0..48).filter_map(|i| engine.overlay_target(i)).collect();

        engine.set_overlay_muted(true);
        assert_eq!(log.borrow().muted, Some(true));
        assert!(engine.settings().overlay_muted());

        engine.set_mode(Mode::Jukebox);
        for i in 0..48 {
            assert_eq!(engine.overlay_target(i), Some(OverlayTarget::silent(i)));
        }
        assert!(engine.drawn_edges().iter().all(|e| e.kind == EdgeKind::Loop));

        engine.set_mode(Mode::Canon);
        let back: Vec<OverlayTarget> = (0..48).filter_map(|i| engine.overlay_target(i)).collect();
        assert_eq!(canon, back);
    }

    #[test]
    fn test_settings_document_moves_between_engines() {
        let (mut source, _clock, _log) = engine();
        source.set_group_enabled(GroupKind::JukeboxLoop, true);
        source.update_field(GroupKind::JukeboxLoop, "minLoopBeats", 16.0);
        let json = source.export_all().to_json().unwrap();

        let (mut target, _clock, _log) = engine();
        target.load_track(periodic_analysis(32, 1, 8));
        let report = target.import_all(&SettingsDocument::from_json(&json).unwrap());

        assert_eq!(report.groups.len(), 4);
        assert!(report.ignored.is_empty());
        assert!(target.group_settings(GroupKind::JukeboxLoop).enabled);
        assert_eq!(target.settings().values(GroupKind::JukeboxLoop)["minLoopBeats"], 16.0);
    }

    #[test]
    fn test_unknown_mode_name() {
        let (mut engine, _clock, _log) = engine();
        assert!(engine.set_mode_by_name("karaoke").is_err());
        engine.set_mode_by_name("eternal").unwrap();
        assert_eq!(engine.mode(), Mode::Eternal);
    }
}
