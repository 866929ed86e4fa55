//! The full daemon: real control loop, real watcher, wall-clock timers.

use dirmirror::collaborators::FsPersister;
use dirmirror::config::MirrorConfig;
use dirmirror::protocol::{ClientMessage, ServerMessage};
use dirmirror::types::{ObserverId, ViewId};
use dirmirror::watch::MirrorDaemon;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for the mirror")
        .expect("outbox closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_daemon_pushes_listing_after_mutation() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("docs")).unwrap();
    let config = MirrorConfig {
        root: temp.path().to_path_buf(),
        ..MirrorConfig::default()
    };
    let (handle, task) = MirrorDaemon::start(&config, Arc::new(FsPersister)).await.unwrap();

    let observer = ObserverId::new();
    let (tx, mut rx) = mpsc::channel(16);
    handle.connect(observer, tx).unwrap();
    handle
        .client(
            observer,
            ClientMessage::RequestUpdate {
                view_id: ViewId::from("v"),
                path: "/docs".to_string(),
            },
        )
        .unwrap();
    match next(&mut rx).await {
        ServerMessage::UpdateDirectory { data, .. } => assert!(data.is_empty()),
        other => panic!("unexpected: {:?}", other),
    }

    handle
        .client(
            observer,
            ClientMessage::SaveFile {
                view_id: ViewId::from("v"),
                to: "/docs/hello.txt".to_string(),
                value: "hello".to_string(),
            },
        )
        .unwrap();
    match next(&mut rx).await {
        ServerMessage::UpdateDirectory { data, .. } => assert_eq!(data["hello.txt"].size, 5),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(handle.stats().flushes >= 1);

    handle.shutdown().unwrap();
    timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    assert!(handle.client(observer, ClientMessage::DestroyView { view_id: ViewId::from("v") }).is_err());
}
