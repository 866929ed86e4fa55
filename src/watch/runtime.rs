//! Mirror daemon: initial walk, filesystem watcher, control loop task.

use super::events::ChangeEvent;
use crate::collaborators::Persister;
use crate::config::MirrorConfig;
use crate::engine::{Command, MirrorEngine, MirrorHandle};
use crate::error::{ApiError, StorageError};
use crate::tree::PathCodec;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// Starts a mirror over one root directory
pub struct MirrorDaemon;

impl MirrorDaemon {
    /// Build the initial tree, start watching, and spawn the control loop.
    ///
    /// The returned handle is the only way to reach the loop; the join
    /// handle completes after [`MirrorHandle::shutdown`].
    pub async fn start(
        config: &MirrorConfig,
        persister: Arc<dyn Persister>,
    ) -> Result<(MirrorHandle, JoinHandle<()>), ApiError> {
        let codec = Arc::new(PathCodec::new(&config.root)?);
        let mut engine = MirrorEngine::new(Arc::clone(&codec), config, persister);
        engine.populate().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = spawn_watcher(codec.root(), tx.clone())?;
        engine.attach_watcher(watcher);
        info!(root = ?codec.root(), "Watching mirror root");

        let handle = MirrorHandle::new(tx, engine.stats());
        let task = tokio::spawn(engine.run(rx));
        Ok((handle, task))
    }
}

fn spawn_watcher(root: &Path, commands: mpsc::UnboundedSender<Command>) -> Result<RecommendedWatcher, ApiError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            if let Some(change) = ChangeEvent::from_notify(event) {
                trace!(?change, "Watcher event");
                if commands.send(Command::Watcher(change)).is_err() {
                    error!("Control loop gone; dropping watcher event");
                }
            }
        }
        Err(e) => warn!("Watch error: {}", e),
    })
    .map_err(|e| watch_error(format!("Failed to create watcher: {}", e)))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| watch_error(format!("Failed to watch directory: {}", e)))?;
    Ok(watcher)
}

fn watch_error(message: String) -> ApiError {
    ApiError::StorageError(StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        message,
    )))
}
