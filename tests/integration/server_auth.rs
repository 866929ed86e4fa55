//! WebSocket handshake and authorization over a real socket.

use dirmirror::collaborators::{FsPersister, TokenAuthorizer};
use dirmirror::config::MirrorConfig;
use dirmirror::server::{router, ServerState};
use dirmirror::watch::MirrorDaemon;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn handshake_status(addr: SocketAddr, target: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        target, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).to_string();
    response.lines().next().unwrap_or_default().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_gates_the_upgrade() {
    let temp = TempDir::new().unwrap();
    let config = MirrorConfig {
        root: temp.path().to_path_buf(),
        ..MirrorConfig::default()
    };
    let (handle, _task) = MirrorDaemon::start(&config, Arc::new(FsPersister)).await.unwrap();
    let app = router(ServerState::new(handle, Arc::new(TokenAuthorizer::new("s3cret")), 8));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    assert!(handshake_status(addr, "/ws").await.contains("401"));
    assert!(handshake_status(addr, "/ws?token=wrong").await.contains("401"));
    assert!(handshake_status(addr, "/ws?token=s3cret").await.contains("101"));
}
