//! Subscription registry
//!
//! Tracks which directory each (observer, view) pair is watching and decides
//! which views are owed a delivery for a given dirty set. Delivery itself is
//! the caller's job: the registry only returns view keys.

mod limiter;

pub use limiter::{Admission, DeliveryLimiter};

use crate::tree::VirtualPath;
use crate::types::{DirtySet, ObserverId, ViewId, ViewKey};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

/// One view's interest in a directory
#[derive(Debug, Clone)]
pub struct Subscription {
    pub observer: ObserverId,
    pub view: ViewId,
    pub directory: VirtualPath,
    pub last_delivered_at: Option<Instant>,
    limiter: DeliveryLimiter,
}

impl Subscription {
    pub fn key(&self) -> ViewKey {
        (self.observer, self.view.clone())
    }
}

/// Registry of all live subscriptions
#[derive(Debug)]
pub struct SubscriptionRegistry {
    default_interval: Duration,
    intervals: HashMap<ObserverId, Duration>,
    subscriptions: HashMap<ViewKey, Subscription>,
    by_directory: HashMap<VirtualPath, HashSet<ViewKey>>,
}

impl SubscriptionRegistry {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
            subscriptions: HashMap::new(),
            by_directory: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, key: &ViewKey) -> Option<&Subscription> {
        self.subscriptions.get(key)
    }

    /// Watch `dir` from this view, replacing any earlier subscription of the view.
    /// Returns the directory previously watched, if any.
    pub fn subscribe(&mut self, observer: ObserverId, view: ViewId, dir: VirtualPath) -> Option<VirtualPath> {
        let key = (observer, view.clone());
        let previous = self.remove_key(&key).map(|s| s.directory);
        let interval = self.interval_for(observer);

        self.by_directory
            .entry(dir.clone())
            .or_default()
            .insert(key.clone());
        self.subscriptions.insert(
            key,
            Subscription {
                observer,
                view,
                directory: dir,
                last_delivered_at: None,
                limiter: DeliveryLimiter::new(interval),
            },
        );
        previous
    }

    /// Drop one view, or every view of the observer when `view` is `None`.
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe(&mut self, observer: ObserverId, view: Option<&ViewId>) -> usize {
        match view {
            Some(view) => self
                .remove_key(&(observer, view.clone()))
                .map_or(0, |_| 1),
            None => {
                let keys: Vec<ViewKey> = self
                    .subscriptions
                    .keys()
                    .filter(|(o, _)| *o == observer)
                    .cloned()
                    .collect();
                for key in &keys {
                    self.remove_key(key);
                }
                self.intervals.remove(&observer);
                keys.len()
            }
        }
    }

    /// Set the minimum delivery interval for every view of `observer`.
    pub fn set_interval(&mut self, observer: ObserverId, interval: Duration) {
        self.intervals.insert(observer, interval);
        for sub in self.subscriptions.values_mut().filter(|s| s.observer == observer) {
            sub.limiter.set_interval(interval);
        }
    }

    /// Views owed a delivery right now for this dirty set.
    ///
    /// Every dirty directory notifies views on itself and on each ancestor.
    /// A view reached from several dirty directories is admitted once.
    pub fn notify(&mut self, dirty: &DirtySet, now: Instant) -> Vec<ViewKey> {
        let targets = self.targets(dirty);
        self.admit(targets, now)
    }

    /// Views on a dirty directory or any of its ancestors.
    pub fn targets(&self, dirty: &DirtySet) -> BTreeSet<ViewKey> {
        let mut targets: BTreeSet<ViewKey> = BTreeSet::new();
        for dir in dirty.iter() {
            for ancestor in dir.self_and_ancestors() {
                if let Some(keys) = self.by_directory.get(&ancestor) {
                    targets.extend(keys.iter().cloned());
                }
            }
        }
        targets
    }

    /// Views strictly below a dirty directory whose own directory is gone.
    pub fn vanished(&self, dirty: &DirtySet, exists: impl Fn(&VirtualPath) -> bool) -> BTreeSet<ViewKey> {
        self.by_directory
            .iter()
            .filter(|(dir, _)| !exists(dir) && dirty.iter().any(|d| dir.is_descendant_of(d)))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Run each target through its rate limiter; returns the ones to deliver now.
    pub fn admit(&mut self, targets: BTreeSet<ViewKey>, now: Instant) -> Vec<ViewKey> {
        let mut due = Vec::new();
        for key in targets {
            let Some(sub) = self.subscriptions.get_mut(&key) else {
                continue;
            };
            match sub.limiter.admit(now) {
                Admission::Fire => {
                    sub.last_delivered_at = Some(now);
                    due.push(key);
                }
                Admission::Deferred(at) => {
                    debug!(observer = %key.0, view = %key.1, ?at, "Delivery deferred");
                }
            }
        }
        due
    }

    /// Trailing deliveries that have come due.
    pub fn take_due(&mut self, now: Instant) -> Vec<ViewKey> {
        let mut due = Vec::new();
        for (key, sub) in self.subscriptions.iter_mut() {
            if sub.limiter.take_trailing(now) {
                sub.last_delivered_at = Some(now);
                due.push(key.clone());
            }
        }
        due.sort();
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.subscriptions
            .values()
            .filter_map(|s| s.limiter.trailing_deadline())
            .min()
    }

    /// Move every view watching `from` or below it to the matching path under `to`.
    pub fn rebase(&mut self, from: &VirtualPath, to: &VirtualPath) -> usize {
        let affected: Vec<VirtualPath> = self
            .by_directory
            .keys()
            .filter(|dir| dir.is_within(from))
            .cloned()
            .collect();
        let mut moved = 0;
        for old_dir in affected {
            let Some(new_dir) = old_dir.rebase(from, to) else {
                continue;
            };
            let Some(keys) = self.by_directory.remove(&old_dir) else {
                continue;
            };
            for key in &keys {
                if let Some(sub) = self.subscriptions.get_mut(key) {
                    sub.directory = new_dir.clone();
                    moved += 1;
                }
            }
            self.by_directory.entry(new_dir).or_default().extend(keys);
        }
        moved
    }

    fn interval_for(&self, observer: ObserverId) -> Duration {
        self.intervals
            .get(&observer)
            .copied()
            .unwrap_or(self.default_interval)
    }

    fn remove_key(&mut self, key: &ViewKey) -> Option<Subscription> {
        let sub = self.subscriptions.remove(key)?;
        if let Some(keys) = self.by_directory.get_mut(&sub.directory) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_directory.remove(&sub.directory);
            }
        }
        Some(sub)
    }
}
