//! Clock port and debounced recompute bookkeeping.
//!
//! Nothing here owns a timer thread. The engine records when a recompute
//! becomes due and the host calls [`RemixEngine::poll`](crate::engine::RemixEngine::poll)
//! from its own tick; [`ManualScheduler`] drives the same path in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::DebounceConfig;
use crate::engine::Mode;
use crate::settings::GroupKind;

/// Monotonic millisecond clock
pub trait Scheduler {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction
pub struct SystemScheduler {
    origin: Instant,
}

impl SystemScheduler {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SystemScheduler {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-advanced clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    now: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Debounce delay for edits to a group
pub fn debounce_delay(config: &DebounceConfig, group: GroupKind) -> u64 {
    match group {
        GroupKind::CanonOverlay => config.canon_overlay_ms,
        GroupKind::EternalOverlay => config.eternal_overlay_ms,
        GroupKind::JukeboxLoop | GroupKind::EternalLoop => config.loop_ms,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRecompute {
    due_ms: u64,
    mode: Mode,
    generation: u64,
}

/// Pending and running recomputes, one slot per settings group
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: [Option<PendingRecompute>; 4],
    in_progress: [bool; 4],
    rerun: [bool; 4],
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the group's recompute; true when an earlier one was replaced
    pub fn schedule(&mut self, group: GroupKind, due_ms: u64, mode: Mode, generation: u64) -> bool {
        let restarted = self.pending[group as usize]
            .replace(PendingRecompute { due_ms, mode, generation })
            .is_some();
        if restarted {
            debug!("Debounce restarted for {} (due {} ms)", group, due_ms);
        }
        restarted
    }

    pub fn cancel(&mut self, group: GroupKind) -> bool {
        self.pending[group as usize].take().is_some()
    }

    /// Drop every entry scheduled while `mode` was active
    pub fn cancel_mode(&mut self, mode: Mode) -> usize {
        let mut cancelled = 0;
        for slot in self.pending.iter_mut() {
            if slot.map_or(false, |p| p.mode == mode) {
                *slot = None;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!("Cancelled {} pending recomputes of {} mode", cancelled, mode);
        }
        cancelled
    }

    pub fn clear(&mut self) {
        self.pending = [None; 4];
    }

    pub fn is_pending(&self, group: GroupKind) -> bool {
        self.pending[group as usize].is_some()
    }

    /// Earliest due time among pending entries
    pub fn next_due(&self) -> Option<u64> {
        self.pending.iter().flatten().map(|p| p.due_ms).min()
    }

    /// Remove and return the groups due at `now_ms`
    ///
    /// Entries armed for another track generation are discarded, not returned.
    pub fn take_due(&mut self, now_ms: u64, generation: u64) -> Vec<GroupKind> {
        let mut due = Vec::new();
        for group in GroupKind::ALL {
            let slot = &mut self.pending[group as usize];
            let Some(entry) = *slot else { continue };
            if entry.generation != generation {
                debug!("Discarding stale recompute of {} (generation {})", group, entry.generation);
                *slot = None;
            } else if entry.due_ms <= now_ms {
                *slot = None;
                due.push(group);
            }
        }
        due
    }

    /// Mark a recompute as running; false (and a coalesced rerun) when one already is
    pub fn begin(&mut self, group: GroupKind) -> bool {
        let idx = group as usize;
        if self.in_progress[idx] {
            self.rerun[idx] = true;
            return false;
        }
        self.in_progress[idx] = true;
        true
    }

    /// End a running recompute; true when an overlapping request asked for one more pass
    pub fn finish(&mut self, group: GroupKind) -> bool {
        let idx = group as usize;
        if std::mem::take(&mut self.rerun[idx]) {
            return true;
        }
        self.in_progress[idx] = false;
        false
    }

    pub fn in_progress(&self, group: GroupKind) -> bool {
        self.in_progress[group as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualScheduler::new();
        let handle = clock.clone();
        handle.advance(120);
        assert_eq!(clock.now_ms(), 120);
        clock.set(5);
        assert_eq!(handle.now_ms(), 5);
    }

    #[test]
    fn test_schedule_restarts_timer() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.schedule(GroupKind::EternalLoop, 150, Mode::Eternal, 1));
        assert!(debouncer.schedule(GroupKind::EternalLoop, 250, Mode::Eternal, 1));

        assert!(debouncer.take_due(200, 1).is_empty());
        assert_eq!(debouncer.take_due(250, 1), vec![GroupKind::EternalLoop]);
        assert!(!debouncer.is_pending(GroupKind::EternalLoop));
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let mut debouncer = Debouncer::new();
        debouncer.schedule(GroupKind::CanonOverlay, 100, Mode::Canon, 1);
        assert!(debouncer.take_due(500, 2).is_empty());
        assert!(!debouncer.is_pending(GroupKind::CanonOverlay));
    }

    #[test]
    fn test_cancel_mode_keeps_other_modes() {
        let mut debouncer = Debouncer::new();
        debouncer.schedule(GroupKind::EternalLoop, 150, Mode::Eternal, 1);
        debouncer.schedule(GroupKind::EternalOverlay, 150, Mode::Eternal, 1);
        debouncer.schedule(GroupKind::JukeboxLoop, 150, Mode::Jukebox, 1);

        assert_eq!(debouncer.cancel_mode(Mode::Eternal), 2);
        assert_eq!(debouncer.next_due(), Some(150));
        assert_eq!(debouncer.take_due(150, 1), vec![GroupKind::JukeboxLoop]);
    }

    #[test]
    fn test_overlapping_recomputes_coalesce() {
        let mut debouncer = Debouncer::new();
        assert!(debouncer.begin(GroupKind::JukeboxLoop));
        assert!(!debouncer.begin(GroupKind::JukeboxLoop));
        assert!(!debouncer.begin(GroupKind::JukeboxLoop));

        // Two overlapping requests, one extra pass
        assert!(debouncer.finish(GroupKind::JukeboxLoop));
        assert!(debouncer.in_progress(GroupKind::JukeboxLoop));
        assert!(!debouncer.finish(GroupKind::JukeboxLoop));
        assert!(!debouncer.in_progress(GroupKind::JukeboxLoop));
    }

    #[test]
    fn test_delays_follow_config() {
        let config = DebounceConfig::default();
        assert_eq!(debounce_delay(&config, GroupKind::CanonOverlay), 120);
        assert_eq!(debounce_delay(&config, GroupKind::EternalOverlay), 150);
        assert_eq!(debounce_delay(&config, GroupKind::JukeboxLoop), 150);
    }
}
