//! Burst collapsing and per-view delivery pacing.

use crate::support::{drain, ms, settled, Harness};
use dirmirror::protocol::ClientMessage;
use dirmirror::tree::VirtualPath;
use dirmirror::types::ViewId;
use std::fs;
use std::time::Instant;

#[tokio::test]
async fn test_burst_collapses_into_one_flush() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "docs", "/docs", t0).await;
    h.watch(obs, &mut rx, "root", "/", t0).await;
    let before = h.engine.stats().read().clone();

    for i in 0..20u64 {
        h.send(
            obs,
            ClientMessage::CreateFile {
                path: format!("/docs/f{}.txt", i),
            },
            t0 + ms(i * 10),
        )
        .await;
    }
    // Still inside the sliding quiet window: nothing flushes.
    h.engine.tick(t0 + ms(250)).await;
    assert!(drain(&mut rx).is_empty());

    h.engine.tick(settled(t0)).await;
    let after = h.engine.stats().read().clone();
    assert_eq!(after.flushes - before.flushes, 1);
    assert_eq!(after.rebuilds - before.rebuilds, 1);
    assert_eq!(after.recomputes - before.recomputes, 1);
    assert_eq!(after.mutations - before.mutations, 20);

    let got = drain(&mut rx);
    assert_eq!(got.len(), 2, "one delivery per view: {:?}", got);
    assert_eq!(h.engine.state().cache.directory(&VirtualPath::parse("/docs").unwrap()).unwrap().files.len(), 20);
}

#[tokio::test]
async fn test_max_delay_caps_a_continuous_stream() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "docs", "/docs", t0).await;

    // A mark every 50ms never leaves a 100ms quiet gap, so only the 1s cap fires.
    let mut flushed_at = None;
    for i in 0..30u64 {
        let now = t0 + ms(i * 50);
        h.send(
            obs,
            ClientMessage::CreateFile {
                path: format!("/docs/s{}.txt", i),
            },
            now,
        )
        .await;
        h.engine.tick(now).await;
        if flushed_at.is_none() && h.engine.stats().read().flushes > 0 {
            flushed_at = Some(i * 50);
        }
    }
    assert_eq!(flushed_at, Some(1_000));
    assert!(!drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_deliveries_are_paced_with_trailing_edge() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.watch(obs, &mut rx, "v", "/docs", t0).await;

    h.send(obs, ClientMessage::CreateFile { path: "/docs/a".to_string() }, t0).await;
    let t1 = t0 + ms(200);
    h.engine.tick(t1).await;
    assert_eq!(drain(&mut rx).len(), 1);

    // Second change flushes 150ms after the first delivery: deferred.
    h.send(obs, ClientMessage::CreateFile { path: "/docs/b".to_string() }, t1 + ms(40)).await;
    h.engine.tick(t1 + ms(150)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.engine.next_deadline(), Some(t1 + ms(250)));

    h.engine.tick(t1 + ms(250)).await;
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(h.engine.next_deadline(), None);
}

#[tokio::test]
async fn test_set_update_interval_lifts_pacing() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    h.send(obs, ClientMessage::SetUpdateInterval { interval_ms: 0 }, t0).await;
    h.watch(obs, &mut rx, "v", "/docs", t0).await;

    h.send(obs, ClientMessage::CreateFile { path: "/docs/a".to_string() }, t0).await;
    h.engine.tick(t0 + ms(200)).await;
    h.send(obs, ClientMessage::CreateFile { path: "/docs/b".to_string() }, t0 + ms(210)).await;
    h.engine.tick(t0 + ms(320)).await;
    assert_eq!(drain(&mut rx).len(), 2);
}

#[tokio::test]
async fn test_request_update_reply_is_not_paced() {
    let mut h = Harness::new(|root| fs::create_dir(root.join("docs")).unwrap()).await;
    let t0 = Instant::now();
    let (obs, mut rx) = h.connect();
    for view in ["a", "a", "a"] {
        h.send(
            obs,
            ClientMessage::RequestUpdate {
                view_id: ViewId::from(view),
                path: "/docs".to_string(),
            },
            t0,
        )
        .await;
    }
    assert_eq!(drain(&mut rx).len(), 3);
    assert_eq!(h.engine.state().registry.len(), 1);
}
