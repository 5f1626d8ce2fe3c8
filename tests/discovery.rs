//! End-to-end UDP discovery scenarios against real loopback sockets.

use std::time::Duration;

use ptmp_chat::discovery;
use tokio_util::sync::CancellationToken;

/// S3/S4. The discovery responder answers a well-formed probe with the
/// padded room name and stays silent for anything else.
#[tokio::test]
async fn discovery_responds_to_probe_and_ignores_other_datagrams() {
    let socket = discovery::bind_responder(0).unwrap();
    let server_addr = socket.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(discovery::serve_responder(
        socket,
        "lobby".to_string(),
        cancel.clone(),
    ));

    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&discovery::PROBE_MAGIC, server_addr)
        .await
        .unwrap();
    let mut buf = [0u8; discovery::ROOM_NAME_REPLY_LEN];
    let (n, _) = client.recv_from(&mut buf).await.unwrap();
    assert_eq!(n, discovery::ROOM_NAME_REPLY_LEN);
    assert_eq!(discovery::unpack_room_name(&buf), "lobby");

    client.send_to(b"AB", server_addr).await.unwrap();
    let silence = tokio::time::timeout(Duration::from_millis(150), client.recv_from(&mut buf));
    assert!(silence.await.is_err(), "non-probe datagrams must get no reply");

    cancel.cancel();
    let _ = handle.await;
}

/// S3. A full probe/reply round trip through the client-side `probe` helper
/// (not just the raw socket), exercising the public discovery client API.
#[tokio::test]
async fn probe_discovers_a_running_responder() {
    let socket = discovery::bind_responder(0).unwrap();
    let server_addr = socket.local_addr().unwrap();
    let port = server_addr.port();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(discovery::serve_responder(
        socket,
        "lobby".to_string(),
        cancel.clone(),
    ));

    let found = discovery::probe(std::net::Ipv4Addr::LOCALHOST, port)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].room_name, "lobby");

    cancel.cancel();
    let _ = handle.await;
}
