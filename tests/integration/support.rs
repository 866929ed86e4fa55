//! Shared fixtures: a mirror engine over a temp directory, driven with explicit instants.

use dirmirror::collaborators::FsPersister;
use dirmirror::config::MirrorConfig;
use dirmirror::protocol::{ClientMessage, ServerMessage};
use dirmirror::tree::PathCodec;
use dirmirror::types::{ObserverId, ViewId};
use dirmirror::MirrorEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub struct Harness {
    _temp: TempDir,
    pub root: PathBuf,
    pub engine: MirrorEngine,
}

impl Harness {
    /// Populate `setup` into a fresh temp root and build the initial tree.
    pub async fn new(setup: impl FnOnce(&Path)) -> Self {
        let temp = TempDir::new().unwrap();
        setup(temp.path());
        let codec = Arc::new(PathCodec::new(temp.path()).unwrap());
        let root = codec.root().to_path_buf();
        let mut engine = MirrorEngine::new(codec, &MirrorConfig::default(), Arc::new(FsPersister));
        engine.populate().await.unwrap();
        Self {
            _temp: temp,
            root,
            engine,
        }
    }

    pub fn connect(&mut self) -> (ObserverId, mpsc::Receiver<ServerMessage>) {
        let observer = ObserverId::new();
        let (tx, rx) = mpsc::channel(64);
        self.engine.connect(observer, tx);
        (observer, rx)
    }

    pub async fn send(&mut self, observer: ObserverId, message: ClientMessage, now: Instant) {
        self.engine.handle_client(observer, message, now).await;
    }

    /// Subscribe `view` to `path` and discard the immediate reply.
    pub async fn watch(
        &mut self,
        observer: ObserverId,
        rx: &mut mpsc::Receiver<ServerMessage>,
        view: &str,
        path: &str,
        now: Instant,
    ) {
        self.send(
            observer,
            ClientMessage::RequestUpdate {
                view_id: ViewId::from(view),
                path: path.to_string(),
            },
            now,
        )
        .await;
        let initial = drain(rx);
        assert!(
            matches!(initial.last(), Some(ServerMessage::UpdateDirectory { .. })),
            "no initial listing for {}: {:?}",
            path,
            initial
        );
    }
}

pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Comfortably past every debounce window in the default config.
pub fn settled(from: Instant) -> Instant {
    from + Duration::from_secs(2)
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
