//! Mirror engine: the single control loop.
//!
//! One task owns the cache, the coalescer, and the subscription registry.
//! Everything that touches them arrives as a [`Command`]: observer messages,
//! connection lifecycle, and watcher notifications. Blocking walks run on the
//! blocking pool and their results are applied back on the loop, so no lock
//! guards the mirror state.

use crate::collaborators::Persister;
use crate::config::MirrorConfig;
use crate::error::{ApiError, StorageError};
use crate::gateway::{Intent, MutationGateway};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::subscription::SubscriptionRegistry;
use crate::tree::{PathCodec, RebuildOutcome, SizeAggregator, SubtreeScan, TreeCache, VirtualPath, Walker};
use crate::types::{DirtySet, ObserverId, ViewId, ViewKey};
use crate::watch::{ChangeCoalescer, ChangeEvent, WatcherDisposition};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// State owned by the control loop.
#[derive(Debug)]
pub struct MirrorState {
    pub cache: TreeCache,
    pub coalescer: ChangeCoalescer,
    pub registry: SubscriptionRegistry,
}

/// Counters for what the loop has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub flushes: u64,
    pub rebuilds: u64,
    pub refreshes: u64,
    pub recomputes: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub suppressed_events: u64,
    pub mutations: u64,
    pub failed_mutations: u64,
}

/// Input to the control loop.
#[derive(Debug)]
pub enum Command {
    Connect {
        observer: ObserverId,
        outbox: mpsc::Sender<ServerMessage>,
    },
    Disconnect {
        observer: ObserverId,
    },
    Client {
        observer: ObserverId,
        message: ClientMessage,
    },
    Watcher(ChangeEvent),
    Shutdown,
}

/// Cloneable handle for talking to a running control loop.
#[derive(Debug, Clone)]
pub struct MirrorHandle {
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<RwLock<MirrorStats>>,
}

impl MirrorHandle {
    pub fn new(commands: mpsc::UnboundedSender<Command>, stats: Arc<RwLock<MirrorStats>>) -> Self {
        Self { commands, stats }
    }

    pub fn send(&self, command: Command) -> Result<(), ApiError> {
        self.commands
            .send(command)
            .map_err(|_| ApiError::Internal("control loop has stopped".to_string()))
    }

    pub fn connect(&self, observer: ObserverId, outbox: mpsc::Sender<ServerMessage>) -> Result<(), ApiError> {
        self.send(Command::Connect { observer, outbox })
    }

    pub fn disconnect(&self, observer: ObserverId) -> Result<(), ApiError> {
        self.send(Command::Disconnect { observer })
    }

    pub fn client(&self, observer: ObserverId, message: ClientMessage) -> Result<(), ApiError> {
        self.send(Command::Client { observer, message })
    }

    pub fn shutdown(&self) -> Result<(), ApiError> {
        self.send(Command::Shutdown)
    }

    pub fn stats(&self) -> MirrorStats {
        self.stats.read().clone()
    }
}

/// The control loop and everything it owns.
pub struct MirrorEngine {
    codec: Arc<PathCodec>,
    walker: Walker,
    gateway: MutationGateway,
    state: MirrorState,
    observers: HashMap<ObserverId, mpsc::Sender<ServerMessage>>,
    stats: Arc<RwLock<MirrorStats>>,
    watcher: Option<RecommendedWatcher>,
}

impl MirrorEngine {
    pub fn new(codec: Arc<PathCodec>, config: &MirrorConfig, persister: Arc<dyn Persister>) -> Self {
        let walker = Walker::new(config.watch.walker_config());
        let gateway = MutationGateway::new(Arc::clone(&codec), walker.clone(), persister);
        Self {
            codec,
            walker,
            gateway,
            state: MirrorState {
                cache: TreeCache::new(),
                coalescer: ChangeCoalescer::new(&config.watch),
                registry: SubscriptionRegistry::new(config.delivery.min_interval()),
            },
            observers: HashMap::new(),
            stats: Arc::new(RwLock::new(MirrorStats::default())),
            watcher: None,
        }
    }

    pub fn state(&self) -> &MirrorState {
        &self.state
    }

    pub fn stats(&self) -> Arc<RwLock<MirrorStats>> {
        Arc::clone(&self.stats)
    }

    /// Keep the filesystem watcher alive for as long as the loop runs.
    pub fn attach_watcher(&mut self, watcher: RecommendedWatcher) {
        self.watcher = Some(watcher);
    }

    /// Initial full walk of the root, followed by a full size computation.
    pub async fn populate(&mut self) -> Result<(), ApiError> {
        let started = Instant::now();
        let root = VirtualPath::root();
        let scan = self.scan_subtree(root.clone()).await?;
        self.state.cache.replace_subtree(scan);
        let all: DirtySet = self.state.cache.keys().cloned().collect();
        SizeAggregator::recompute(&mut self.state.cache, &all);
        info!(
            root = ?self.codec.root(),
            directories = self.state.cache.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initial tree built"
        );
        Ok(())
    }

    pub fn connect(&mut self, observer: ObserverId, outbox: mpsc::Sender<ServerMessage>) {
        debug!(observer = %observer, "Observer connected");
        self.observers.insert(observer, outbox);
    }

    /// Drop the observer and every subscription it holds.
    pub fn disconnect(&mut self, observer: ObserverId) {
        let removed = self.state.registry.unsubscribe(observer, None);
        self.observers.remove(&observer);
        debug!(observer = %observer, subscriptions = removed, "Observer disconnected");
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.state.coalescer.next_deadline(),
            self.state.registry.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handle one command. Returns false when the loop should stop.
    pub async fn handle_command(&mut self, command: Command, now: Instant) -> bool {
        match command {
            Command::Connect { observer, outbox } => self.connect(observer, outbox),
            Command::Disconnect { observer } => self.disconnect(observer),
            Command::Client { observer, message } => self.handle_client(observer, message, now).await,
            Command::Watcher(event) => self.handle_watcher_event(&event, now),
            Command::Shutdown => return false,
        }
        true
    }

    pub async fn handle_client(&mut self, observer: ObserverId, message: ClientMessage, now: Instant) {
        match message {
            ClientMessage::RequestUpdate { view_id, path } => self.request_update(observer, view_id, &path),
            ClientMessage::DestroyView { view_id } => {
                self.state.registry.unsubscribe(observer, Some(&view_id));
            }
            ClientMessage::SetUpdateInterval { interval_ms } => {
                self.state
                    .registry
                    .set_interval(observer, Duration::from_millis(interval_ms));
            }
            other => {
                let view = other.view_id().cloned();
                let Some(intent) = Intent::from_message(other) else {
                    return;
                };
                match self.gateway.apply(&mut self.state, intent, now).await {
                    Ok(_) => self.stats.write().mutations += 1,
                    Err(e) => {
                        self.stats.write().failed_mutations += 1;
                        self.send(observer, ServerMessage::error(view, e.to_string()));
                    }
                }
            }
        }
    }

    /// Subscribe a view and answer with the current listing.
    ///
    /// A file path subscribes to its folder and is answered with
    /// `UPDATE_BE_FILE` followed by the folder listing. The reply is not
    /// subject to the view's delivery interval.
    fn request_update(&mut self, observer: ObserverId, view: ViewId, raw: &str) {
        let path = match VirtualPath::parse(raw) {
            Ok(path) => path,
            Err(e) => {
                self.send(observer, ServerMessage::error(Some(view), e.to_string()));
                return;
            }
        };

        if self.state.cache.contains_dir(&path) {
            self.state.registry.subscribe(observer, view.clone(), path.clone());
            self.deliver_listing(observer, view, &path);
            return;
        }

        let folder = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) if self.state.cache.file(&parent, name).is_some() => parent,
            _ => {
                let err = ApiError::not_found(path.to_string());
                self.send(observer, ServerMessage::error(Some(view), err.to_string()));
                return;
            }
        };
        self.state.registry.subscribe(observer, view.clone(), folder.clone());
        self.send(
            observer,
            ServerMessage::UpdateBeFile {
                view_id: view.clone(),
                file: path.to_string(),
                folder: folder.to_string(),
            },
        );
        self.deliver_listing(observer, view, &folder);
    }

    /// Route a watcher notification to the rescan tier of the coalescer.
    pub fn handle_watcher_event(&mut self, event: &ChangeEvent, now: Instant) {
        for absolute in event.paths() {
            if self.walker.ignore_rules().is_ignored(&absolute) {
                continue;
            }
            let path = match self.codec.to_virtual(&absolute) {
                Ok(path) => path,
                Err(e) => {
                    debug!(path = ?absolute, error = %e, "Watcher path outside mirror root");
                    continue;
                }
            };
            let dir = path.parent().unwrap_or_else(VirtualPath::root);
            if self.state.coalescer.observe_watcher_event(dir, now) == WatcherDisposition::Suppressed {
                self.stats.write().suppressed_events += 1;
            }
        }
    }

    /// Flush whatever is due and send trailing deliveries.
    pub async fn tick(&mut self, now: Instant) {
        self.flush(now).await;
        for key in self.state.registry.take_due(now) {
            self.deliver(&key);
        }
    }

    /// Run until shutdown or until every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(root = ?self.codec.root(), "Control loop started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, Instant::now()).await {
                        break;
                    }
                }
                _ = sleep_until(deadline) => {
                    self.tick(Instant::now()).await;
                }
            }
        }
        info!("Control loop stopped");
    }

    async fn flush(&mut self, now: Instant) {
        let Some(batch) = self.state.coalescer.poll(now) else {
            return;
        };

        for dir in self.escalate_orphans(&batch.rebuild) {
            let scan = self.scan_subtree(dir.clone()).await;
            match self.state.cache.apply_subtree_scan(&dir, scan) {
                RebuildOutcome::Replaced { directories } => {
                    debug!(dir = %dir, directories, "Rebuilt subtree");
                }
                RebuildOutcome::Vanished { removed } => {
                    debug!(dir = %dir, removed, "Subtree vanished");
                }
                RebuildOutcome::Kept => {}
            }
            self.stats.write().rebuilds += 1;
        }

        for dir in &batch.refresh {
            if !self.state.cache.contains_dir(dir) {
                continue;
            }
            let (codec, walker, target) = (Arc::clone(&self.codec), self.walker.clone(), dir.clone());
            let scan = run_blocking(move || walker.scan_files(&codec, &target)).await;
            match scan {
                Ok(scan) => {
                    if let Err(e) = self.state.cache.apply_file_scan(scan) {
                        debug!(dir = %dir, error = %e, "Refresh target left the cache");
                    }
                }
                Err(e) if e.is_not_found() => {
                    self.state.cache.remove_directory(dir);
                }
                Err(e) => warn!(dir = %dir, error = %e, "Refresh failed; keeping last known state"),
            }
            self.stats.write().refreshes += 1;
        }

        SizeAggregator::recompute(&mut self.state.cache, &batch.dirty);
        let registry = &mut self.state.registry;
        let cache = &self.state.cache;
        let mut targets = registry.targets(&batch.dirty);
        targets.extend(registry.vanished(&batch.dirty, |dir| cache.contains_dir(dir)));
        let due = registry.admit(targets, now);
        self.state.coalescer.finish_flush();
        {
            let mut stats = self.stats.write();
            stats.recomputes += 1;
            stats.flushes += 1;
        }
        debug!(dirty = batch.dirty.len(), deliveries = due.len(), "Flush complete");

        for key in due {
            self.deliver(&key);
        }
    }

    /// Rebuild targets whose parent is not cached are widened to the
    /// nearest cached ancestor, then reduced to a minimal cover again.
    fn escalate_orphans(&self, targets: &[VirtualPath]) -> Vec<VirtualPath> {
        let widened: BTreeSet<VirtualPath> = targets
            .iter()
            .map(|dir| match dir.parent() {
                Some(parent) if !self.state.cache.contains_dir(&parent) => {
                    let anchor = self.state.cache.nearest_cached(&parent);
                    debug!(dir = %dir, anchor = %anchor, "Escalating orphaned rebuild");
                    anchor
                }
                _ => dir.clone(),
            })
            .collect();
        let mut cover: Vec<VirtualPath> = Vec::new();
        for dir in widened {
            if !cover.iter().any(|kept| dir.is_within(kept)) {
                cover.push(dir);
            }
        }
        cover
    }

    async fn scan_subtree(&self, dir: VirtualPath) -> Result<SubtreeScan, StorageError> {
        let (codec, walker) = (Arc::clone(&self.codec), self.walker.clone());
        run_blocking(move || walker.scan_subtree(&codec, &dir)).await
    }

    fn deliver(&mut self, key: &ViewKey) {
        let Some(sub) = self.state.registry.get(key) else {
            return;
        };
        let (observer, view, dir) = (sub.observer, sub.view.clone(), sub.directory.clone());
        self.deliver_listing(observer, view, &dir);
    }

    fn deliver_listing(&mut self, observer: ObserverId, view: ViewId, dir: &VirtualPath) {
        let message = match self.state.cache.snapshot(dir) {
            Ok(listing) => ServerMessage::directory(view, listing),
            Err(e) => ServerMessage::error(Some(view), e.to_string()),
        };
        self.send(observer, message);
    }

    fn send(&mut self, observer: ObserverId, message: ServerMessage) {
        let Some(outbox) = self.observers.get(&observer) else {
            return;
        };
        match outbox.try_send(message) {
            Ok(()) => self.stats.write().deliveries += 1,
            Err(TrySendError::Full(_)) => {
                let err = ApiError::DeliveryUnready(observer.to_string());
                warn!(error = %err, "Dropping delivery");
                self.stats.write().dropped_deliveries += 1;
            }
            Err(TrySendError::Closed(_)) => self.disconnect(observer),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}
