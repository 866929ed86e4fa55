//! Mutations issued over the protocol: validation, error routing, cache effects.

use crate::support::{drain, settled, Harness};
use dirmirror::protocol::{ClientMessage, ClipboardMode, ServerMessage};
use dirmirror::tree::VirtualPath;
use dirmirror::types::ViewId;
use std::fs;
use std::time::Instant;

#[tokio::test]
async fn test_traversal_is_rejected_without_touching_anything() {
    let mut h = Harness::new(|_| {}).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    let cached_before = h.engine.state().cache.len();

    for path in ["../../etc/passwd", "/docs/../../x", "a\\..\\b", "bad|name"] {
        h.send(obs, ClientMessage::CreateFile { path: path.to_string() }, t0).await;
    }

    let got = drain(&mut rx);
    assert_eq!(got.len(), 4);
    assert!(got.iter().all(|m| matches!(m, ServerMessage::Error { view_id: None, .. })));
    assert_eq!(h.engine.state().cache.len(), cached_before);
    assert_eq!(h.engine.next_deadline(), None);
    assert!(!h.engine.state().coalescer.is_suppressed(t0));
    assert_eq!(h.engine.stats().read().failed_mutations, 4);
    assert_eq!(fs::read_dir(&h.root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_save_error_is_attributed_to_view() {
    let mut h = Harness::new(|_| {}).await;
    let (obs, mut rx) = h.connect();
    h.send(
        obs,
        ClientMessage::SaveFile {
            view_id: ViewId::from("editor"),
            to: "/missing/dir/file.txt".to_string(),
            value: "x".to_string(),
        },
        Instant::now(),
    )
    .await;
    match drain(&mut rx).as_slice() {
        [ServerMessage::Error { view_id, text }] => {
            assert_eq!(view_id, &Some(ViewId::from("editor")));
            assert!(text.contains("Not found"), "{}", text);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_folder_lifecycle_round_trip() {
    let mut h = Harness::new(|_| {}).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "root", "/", t0).await;

    h.send(obs, ClientMessage::CreateFolder { path: "/work".to_string() }, t0).await;
    h.send(obs, ClientMessage::CreateFile { path: "/work/a.txt".to_string() }, t0).await;
    h.send(
        obs,
        ClientMessage::Clipboard {
            src: "/work/a.txt".to_string(),
            dst: "/work".to_string(),
            mode: ClipboardMode::Copy,
        },
        t0,
    )
    .await;
    h.send(
        obs,
        ClientMessage::Rename {
            src: "/work".to_string(),
            dst: "/done".to_string(),
        },
        t0,
    )
    .await;
    h.engine.tick(settled(t0)).await;

    let got = drain(&mut rx);
    assert_eq!(got.len(), 1, "{:?}", got);
    match &got[0] {
        ServerMessage::UpdateDirectory { data, .. } => {
            assert!(data.contains_key("done"));
            assert!(!data.contains_key("work"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    let done = VirtualPath::parse("/done").unwrap();
    let node = h.engine.state().cache.directory(&done).unwrap();
    let names: Vec<&str> = node.files.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a (1).txt", "a.txt"]);
    assert!(h.root.join("done/a (1).txt").is_file());
}

#[tokio::test]
async fn test_unknown_paths_are_reported_per_view() {
    let mut h = Harness::new(|_| {}).await;
    let (obs, mut rx) = h.connect();
    h.send(
        obs,
        ClientMessage::RequestUpdate {
            view_id: ViewId::from("v"),
            path: "/ghost".to_string(),
        },
        Instant::now(),
    )
    .await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerMessage::Error { view_id: Some(_), .. }]
    ));
}
