//! Change coalescing
//!
//! Collapses bursts of watcher notifications and self-initiated mutations
//! into one dirty set per flush. Pure data structure: every method takes the
//! current instant, so the control loop owns all timers.
//!
//! Two tiers are kept apart:
//! - the rescan tier collects watcher notifications under a long debounce,
//!   since each one costs a subtree walk;
//! - the flush tier collects dirty marks under a short trailing debounce with
//!   a hard cap, and drives rebuild, size aggregation and fan-out.
//!
//! Each directory key moves clean → dirty → flushed → clean.

use super::events::WatchConfig;
use crate::tree::VirtualPath;
use crate::types::{ChangeKind, DirtySet};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Observable state of one directory key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Clean,
    Dirty { kind: ChangeKind, armed_at: Instant },
    Flushed { kind: ChangeKind },
}

/// What happened to a watcher notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherDisposition {
    /// Inside a self-mutation suppression window; dropped.
    Suppressed,
    /// Queued for a rescan.
    Scheduled,
}

/// One flush worth of work, handed to the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushBatch {
    /// Minimal set of subtrees to walk again; no entry lies below another.
    pub rebuild: Vec<VirtualPath>,
    /// Directories needing only a shallow file refresh, not covered by `rebuild`.
    pub refresh: Vec<VirtualPath>,
    /// Every dirty directory, for fan-out.
    pub dirty: DirtySet,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    armed_at: Instant,
    last_mark: Instant,
}

impl Window {
    fn open(now: Instant) -> Self {
        Self {
            armed_at: now,
            last_mark: now,
        }
    }

    fn deadline(&self, quiet: Duration, cap: Duration) -> Instant {
        (self.last_mark + quiet).min(self.armed_at + cap)
    }
}

/// Two-tier debounce with self-mutation suppression
#[derive(Debug)]
pub struct ChangeCoalescer {
    quiet: Duration,
    max_delay: Duration,
    rescan_quiet: Duration,
    rescan_max_delay: Duration,
    suppression: Duration,
    states: HashMap<VirtualPath, DirState>,
    flush_window: Option<Window>,
    rescans: BTreeSet<VirtualPath>,
    rescan_window: Option<Window>,
    suppress_until: Option<Instant>,
}

impl ChangeCoalescer {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            quiet: config.quiet(),
            max_delay: config.max_delay(),
            rescan_quiet: config.rescan_debounce(),
            rescan_max_delay: config.rescan_max_delay(),
            suppression: config.suppression(),
            states: HashMap::new(),
            flush_window: None,
            rescans: BTreeSet::new(),
            rescan_window: None,
            suppress_until: None,
        }
    }

    /// Mark `dir` dirty. Never blocked by suppression.
    pub fn mark_dirty(&mut self, dir: VirtualPath, kind: ChangeKind, now: Instant) {
        let next = match self.states.get(&dir) {
            Some(DirState::Dirty { kind: prev, armed_at }) => DirState::Dirty {
                kind: (*prev).max(kind),
                armed_at: *armed_at,
            },
            _ => DirState::Dirty { kind, armed_at: now },
        };
        trace!(dir = %dir, ?kind, "Marked dirty");
        self.states.insert(dir, next);

        match self.flush_window.as_mut() {
            Some(window) => window.last_mark = now,
            None => self.flush_window = Some(Window::open(now)),
        }
    }

    /// Open (or extend) the self-mutation suppression window.
    pub fn enter_suppression(&mut self, now: Instant) {
        let until = now + self.suppression;
        self.suppress_until = Some(match self.suppress_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppress_until.map_or(false, |until| now < until)
    }

    /// Feed a watcher notification whose parent directory is `dir`.
    pub fn observe_watcher_event(&mut self, dir: VirtualPath, now: Instant) -> WatcherDisposition {
        if self.is_suppressed(now) {
            trace!(dir = %dir, "Watcher event suppressed");
            return WatcherDisposition::Suppressed;
        }
        self.suppress_until = None;
        self.rescans.insert(dir);
        match self.rescan_window.as_mut() {
            Some(window) => window.last_mark = now,
            None => self.rescan_window = Some(Window::open(now)),
        }
        WatcherDisposition::Scheduled
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let flush = self
            .flush_window
            .map(|w| w.deadline(self.quiet, self.max_delay));
        let rescan = self
            .rescan_window
            .map(|w| w.deadline(self.rescan_quiet, self.rescan_max_delay));
        match (flush, rescan) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Promote due rescans and take the flush batch if its window has closed.
    ///
    /// Keys in the returned batch move to the flushed state until
    /// [`finish_flush`](Self::finish_flush) is called.
    pub fn poll(&mut self, now: Instant) -> Option<FlushBatch> {
        self.promote_rescans(now);

        let window = self.flush_window?;
        if now < window.deadline(self.quiet, self.max_delay) {
            return None;
        }
        self.flush_window = None;

        let mut structural: Vec<VirtualPath> = Vec::new();
        let mut content: Vec<VirtualPath> = Vec::new();
        let mut dirty = DirtySet::new();
        for (dir, state) in self.states.iter_mut() {
            if let DirState::Dirty { kind, .. } = *state {
                match kind {
                    ChangeKind::Structural => structural.push(dir.clone()),
                    ChangeKind::Content => content.push(dir.clone()),
                }
                dirty.insert(dir.clone());
                *state = DirState::Flushed { kind };
            }
        }
        if dirty.is_empty() {
            return None;
        }

        let rebuild = minimal_cover(structural);
        content.retain(|dir| !rebuild.iter().any(|r| dir.is_within(r)));
        content.sort();

        debug!(
            dirty = dirty.len(),
            rebuild = rebuild.len(),
            refresh = content.len(),
            waited_ms = now.duration_since(window.armed_at).as_millis() as u64,
            "Flush batch ready"
        );
        Some(FlushBatch {
            rebuild,
            refresh: content,
            dirty,
        })
    }

    /// Return flushed keys to clean.
    pub fn finish_flush(&mut self) {
        self.states
            .retain(|_, state| !matches!(state, DirState::Flushed { .. }));
    }

    pub fn state_of(&self, dir: &VirtualPath) -> DirState {
        self.states.get(dir).copied().unwrap_or(DirState::Clean)
    }

    /// Number of directories currently dirty or awaiting rescan.
    pub fn pending(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, DirState::Dirty { .. }))
            .count()
            + self.rescans.len()
    }

    fn promote_rescans(&mut self, now: Instant) {
        let Some(window) = self.rescan_window else {
            return;
        };
        if now < window.deadline(self.rescan_quiet, self.rescan_max_delay) {
            return;
        }
        self.rescan_window = None;
        let dirs = std::mem::take(&mut self.rescans);
        debug!(count = dirs.len(), "Promoting watcher rescans");
        for dir in dirs {
            self.mark_dirty(dir, ChangeKind::Structural, now);
        }
    }
}

/// Drop every path that lies below another path in the set.
fn minimal_cover(mut dirs: Vec<VirtualPath>) -> Vec<VirtualPath> {
    dirs.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.cmp(b)));
    let mut kept: Vec<VirtualPath> = Vec::new();
    for dir in dirs {
        if !kept.iter().any(|k| dir.is_within(k)) {
            kept.push(dir);
        }
    }
    kept
}
