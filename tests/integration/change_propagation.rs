//! Observer-visible propagation of changes through the flush pipeline.

use crate::support::{drain, ms, settled, Harness};
use dirmirror::protocol::{ClientMessage, ServerMessage};
use dirmirror::tree::{EntryKind, VirtualPath};
use dirmirror::types::ViewId;
use std::fs;
use std::time::Instant;

fn listing(messages: &[ServerMessage]) -> Vec<(&str, &str)> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::UpdateDirectory { view_id, folder, .. } => Some((view_id.0.as_str(), folder.as_str())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_new_file_reaches_folder_and_ancestor_views_once() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (a, mut rx_a) = h.connect();
    let (b, mut rx_b) = h.connect();
    h.watch(a, &mut rx_a, "docs", "/docs", t0).await;
    h.watch(b, &mut rx_b, "root", "/", t0).await;

    h.send(
        a,
        ClientMessage::SaveFile {
            view_id: ViewId::from("docs"),
            to: "/docs/readme.txt".to_string(),
            value: "0123456789".to_string(),
        },
        t0 + ms(5),
    )
    .await;
    assert!(drain(&mut rx_a).is_empty(), "mutation should not answer on success");
    h.engine.tick(settled(t0)).await;

    let got_a = drain(&mut rx_a);
    assert_eq!(listing(&got_a), vec![("docs", "/docs")]);
    match &got_a[0] {
        ServerMessage::UpdateDirectory { data, .. } => {
            let entry = &data["readme.txt"];
            assert_eq!(entry.kind, EntryKind::File);
            assert_eq!(entry.size, 10);
        }
        other => panic!("unexpected: {:?}", other),
    }

    let got_b = drain(&mut rx_b);
    assert_eq!(listing(&got_b), vec![("root", "/")]);
    match &got_b[0] {
        ServerMessage::UpdateDirectory { data, .. } => {
            assert_eq!(data["docs"].kind, EntryKind::Dir);
            assert_eq!(data["docs"].size, 10);
        }
        other => panic!("unexpected: {:?}", other),
    }

    let root = h.engine.state().cache.directory(&VirtualPath::root()).unwrap();
    assert_eq!(root.size, 10);
}

#[tokio::test]
async fn test_move_notifies_destination_view_and_clears_old_keys() {
    let mut h = Harness::new(|root| {
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::write(root.join("docs/deep/x.bin"), vec![0u8; 7]).unwrap();
        fs::create_dir(root.join("archive")).unwrap();
    })
    .await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "arch", "/archive", t0).await;

    h.send(
        obs,
        ClientMessage::Clipboard {
            src: "/docs".to_string(),
            dst: "/archive".to_string(),
            mode: dirmirror::protocol::ClipboardMode::Cut,
        },
        t0 + ms(1),
    )
    .await;
    h.engine.tick(settled(t0)).await;

    let got = drain(&mut rx);
    assert_eq!(listing(&got), vec![("arch", "/archive")]);
    match &got[0] {
        ServerMessage::UpdateDirectory { data, .. } => assert_eq!(data["docs"].size, 7),
        other => panic!("unexpected: {:?}", other),
    }
    let docs = VirtualPath::parse("/docs").unwrap();
    assert!(h.engine.state().cache.keys().all(|k| !k.is_within(&docs)));
    assert!(h.root.join("archive/docs/deep/x.bin").is_file());
}

#[tokio::test]
async fn test_view_inside_deleted_directory_gets_error_but_stays_subscribed() {
    let mut h = Harness::new(|root| fs::create_dir_all(root.join("a/b")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "inner", "/a/b", t0).await;

    h.send(obs, ClientMessage::DeleteFile { path: "/a".to_string() }, t0).await;
    h.engine.tick(settled(t0)).await;

    let got = drain(&mut rx);
    assert_eq!(got.len(), 1);
    match &got[0] {
        ServerMessage::Error { view_id, .. } => assert_eq!(view_id.as_ref().map(|v| v.0.as_str()), Some("inner")),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(h.engine.state().registry.len(), 1);
}

#[tokio::test]
async fn test_destroyed_view_receives_nothing() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "v", "/docs", t0).await;
    h.send(obs, ClientMessage::DestroyView { view_id: ViewId::from("v") }, t0).await;

    h.send(obs, ClientMessage::CreateFile { path: "/docs/n.txt".to_string() }, t0).await;
    h.engine.tick(settled(t0)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_external_change_flows_through_rescan_tier() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "v", "/docs", t0).await;

    let written = h.root.join("docs/outside.txt");
    fs::write(&written, b"abc").unwrap();
    h.engine
        .handle_watcher_event(&dirmirror::watch::ChangeEvent::Created(written), t0);

    // The rescan promotes first; the flush follows on a later tick.
    h.engine.tick(t0 + ms(1_000)).await;
    h.engine.tick(settled(t0)).await;

    let got = drain(&mut rx);
    assert_eq!(got.len(), 1);
    match &got[0] {
        ServerMessage::UpdateDirectory { data, .. } => assert_eq!(data["outside.txt"].size, 3),
        other => panic!("unexpected: {:?}", other),
    }
}
