//! End-to-end scenarios against the real accept loop, registry, and relay —
//! as opposed to the unit tests colocated with each module, which exercise
//! one component in isolation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ptmp_chat::display::test_support::RecordingDisplay;
use ptmp_chat::{frame, server};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn spawn_server(
    max_clients: usize,
) -> (SocketAddr, Arc<RecordingDisplay>, CancellationToken, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener); // just reserving a free port; the real bind happens in run_threaded

    let display = Arc::new(RecordingDisplay::new());
    let cancel = CancellationToken::new();
    let config = server::ServerConfig {
        bind_addr: addr,
        max_clients,
        max_frame_len: frame::DEFAULT_MAX_FRAME_LEN,
        backlog: 16,
    };
    let run_display = display.clone();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let _ = server::run_threaded(config, run_display, run_cancel).await;
    });
    // Give the listener a moment to actually bind before clients connect.
    tokio::time::sleep(Duration::from_millis(30)).await;
    (addr, display, cancel, handle)
}

async fn join(addr: SocketAddr, username: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    frame::write_frame(&mut stream, username.as_bytes())
        .await
        .unwrap();
    stream
}

/// S1. Three clients join; one sends a message; the other two each receive
/// exactly one copy and the sender receives nothing back.
#[tokio::test]
async fn single_message_relay_reaches_every_other_client() {
    let (addr, display, cancel, handle) = spawn_server(32).await;

    let mut a = join(addr, "a").await;
    let mut b = join(addr, "b").await;
    let mut c = join(addr, "c").await;

    frame::write_frame(&mut a, b"[a] hi").await.unwrap();

    let got_b = frame::decode(&mut b, frame::DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    let got_c = frame::decode(&mut c, frame::DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    assert_eq!(got_b, b"[a] hi");
    assert_eq!(got_c, b"[a] hi");

    // A receives nothing back within a short window (no self-echo).
    let mut buf = [0u8; 1];
    let self_echo = tokio::time::timeout(Duration::from_millis(100), a.try_read(&mut buf));
    assert!(self_echo.await.is_err());

    // Exactly one copy was displayed on the server side.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(display.lines(), vec!["[a] hi".to_string()]);

    cancel.cancel();
    let _ = handle.await;
}

/// S2. With a cap of 2 and two clients already connected, a third is
/// admitted through the handshake but then rejected with a single frame and
/// a closed socket.
#[tokio::test]
async fn admission_cap_rejects_extra_clients() {
    let (addr, _display, cancel, handle) = spawn_server(2).await;

    let _a = join(addr, "a").await;
    let _b = join(addr, "b").await;
    let mut c = join(addr, "c").await;

    let payload = frame::decode(&mut c, frame::DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    assert_eq!(payload, b"Too many clients!");

    // The server closes the socket right after; a further read sees EOF.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_millis(200), c.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "server should close the rejected connection");

    cancel.cancel();
    let _ = handle.await;
}

/// S6. Two payloads sent by the same originator, back to back, are observed
/// by every other client in send order.
#[tokio::test]
async fn ordering_across_two_sends_is_fifo() {
    let (addr, _display, cancel, handle) = spawn_server(32).await;

    let mut a = join(addr, "a").await;
    let mut b = join(addr, "b").await;

    frame::write_frame(&mut a, b"[a] first").await.unwrap();
    frame::write_frame(&mut a, b"[a] second").await.unwrap();

    let first = frame::decode(&mut b, frame::DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    let second = frame::decode(&mut b, frame::DEFAULT_MAX_FRAME_LEN)
        .await
        .unwrap();
    assert_eq!(first, b"[a] first");
    assert_eq!(second, b"[a] second");

    cancel.cancel();
    let _ = handle.await;
}
