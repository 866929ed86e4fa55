//! Watch events and timing configuration.

use crate::tree::WalkerConfig;
use notify::{Event, EventKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Watch mode configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet interval before a dirty batch is flushed (milliseconds)
    pub quiet_ms: u64,
    /// Upper bound on how long a dirty batch may keep sliding (milliseconds)
    pub max_delay_ms: u64,
    /// Quiet interval for watcher-triggered rescans (milliseconds)
    pub rescan_debounce_ms: u64,
    /// Upper bound for watcher-triggered rescans (milliseconds)
    pub rescan_max_delay_ms: u64,
    /// Window after a self-initiated mutation during which watcher events are ignored
    pub suppression_ms: u64,
    /// Ignore patterns (glob patterns)
    pub ignore_patterns: Vec<String>,
    /// Descend into symlinked directories
    pub follow_symlinks: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_ms: 100,
            max_delay_ms: 1000,
            rescan_debounce_ms: 1000,
            rescan_max_delay_ms: 5000,
            suppression_ms: 3000,
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/.DS_Store".to_string(),
                "**/*.swp".to_string(),
                "**/*.tmp".to_string(),
            ],
            follow_symlinks: false,
        }
    }
}

impl WatchConfig {
    pub fn quiet(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.quiet_ms))
    }

    pub fn rescan_debounce(&self) -> Duration {
        Duration::from_millis(self.rescan_debounce_ms)
    }

    pub fn rescan_max_delay(&self) -> Duration {
        Duration::from_millis(self.rescan_max_delay_ms.max(self.rescan_debounce_ms))
    }

    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            ignore_patterns: self.ignore_patterns.clone(),
            max_depth: None,
        }
    }
}

/// Filesystem change event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl ChangeEvent {
    /// Convert a raw notify event; access and metadata-less events are dropped.
    pub fn from_notify(event: Event) -> Option<ChangeEvent> {
        match event.kind {
            EventKind::Create(_) => event.paths.first().map(|p| ChangeEvent::Created(p.clone())),
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                if event.paths.len() >= 2 {
                    Some(ChangeEvent::Renamed {
                        from: event.paths[0].clone(),
                        to: event.paths[1].clone(),
                    })
                } else {
                    event.paths.first().map(|p| ChangeEvent::Modified(p.clone()))
                }
            }
            EventKind::Modify(_) => event.paths.first().map(|p| ChangeEvent::Modified(p.clone())),
            EventKind::Remove(_) => event.paths.first().map(|p| ChangeEvent::Removed(p.clone())),
            _ => None,
        }
    }

    /// Every absolute path touched by the event.
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Removed(p) => {
                vec![p.clone()]
            }
            ChangeEvent::Renamed { from, to } => vec![from.clone(), to.clone()],
        }
    }
}
