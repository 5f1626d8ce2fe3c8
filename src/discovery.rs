//! UDP service discovery: a client broadcasts a two-byte probe and every
//! listening server replies with its room name, zero-padded to 32 bytes.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// The two-byte probe a client sends to find servers on the LAN.
pub const PROBE_MAGIC: [u8; 2] = [0x7F, 0x7F];

/// Fixed width of a discovery reply: the room name, NUL-padded.
pub const ROOM_NAME_REPLY_LEN: usize = 32;

/// How long a probing client waits for replies before giving up.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a UDP socket with `SO_REUSEADDR` set before bind, so more than one
/// local instance (as in integration tests) can share a discovery port.
fn bind_reusable(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from(addr).into())?;
    Ok(socket.into())
}

/// Pack a room name into a fixed 32-byte, NUL-padded reply buffer.
/// Names longer than 32 bytes are truncated.
fn pack_room_name(room_name: &str) -> [u8; ROOM_NAME_REPLY_LEN] {
    let mut buf = [0u8; ROOM_NAME_REPLY_LEN];
    let bytes = room_name.as_bytes();
    let len = bytes.len().min(ROOM_NAME_REPLY_LEN);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Unpack a 32-byte NUL-padded reply buffer back into a room name string.
pub fn unpack_room_name(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Bind the responder's socket, so a caller can read back the bound address
/// before handing it to [`serve_responder`] (tests use port `0`).
pub fn bind_responder(port: u16) -> anyhow::Result<UdpSocket> {
    Ok(UdpSocket::from_std(bind_reusable(port)?)?)
}

/// Server-side responder: answer every probe on `socket` with the room
/// name, until cancelled.
pub async fn serve_responder(
    socket: UdpSocket,
    room_name: String,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("discovery responder listening on {}", socket.local_addr()?);
    let reply = pack_room_name(&room_name);

    let mut buf = [0u8; 2];
    loop {
        let (n, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => result?,
        };
        if n != PROBE_MAGIC.len() || buf != PROBE_MAGIC {
            continue;
        }
        if let Err(e) = socket.send_to(&reply, peer).await {
            log::warn!("discovery: reply to {peer} failed: {e}");
        }
    }
    log::debug!("discovery responder stopped");
    Ok(())
}

/// Bind and serve in one call, for binaries that don't need the bound
/// address ahead of time.
pub async fn run_responder(
    port: u16,
    room_name: String,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let socket = bind_responder(port)?;
    serve_responder(socket, room_name, cancel).await
}

/// One server found while probing, with the address it replied from.
#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub addr: SocketAddr,
    pub room_name: String,
}

/// Client-side probe: broadcast the magic probe to `broadcast_addr:port` and
/// collect replies until no reply arrives within [`PROBE_TIMEOUT`].
pub async fn probe(broadcast_addr: Ipv4Addr, port: u16) -> anyhow::Result<Vec<DiscoveredServer>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&PROBE_MAGIC, (broadcast_addr, port))
        .await?;

    let mut found = Vec::new();
    let mut buf = [0u8; ROOM_NAME_REPLY_LEN];
    loop {
        match tokio::time::timeout(PROBE_TIMEOUT, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, peer))) => found.push(DiscoveredServer {
                addr: peer,
                room_name: unpack_room_name(&buf[..n]),
            }),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break, // timed out waiting for the next reply
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_round_trip() {
        let packed = pack_room_name("lobby");
        assert_eq!(packed.len(), ROOM_NAME_REPLY_LEN);
        assert_eq!(unpack_room_name(&packed), "lobby");
    }

    #[test]
    fn pack_truncates_long_names() {
        let long = "x".repeat(64);
        let packed = pack_room_name(&long);
        assert_eq!(unpack_room_name(&packed).len(), ROOM_NAME_REPLY_LEN);
    }

    #[tokio::test]
    async fn responder_answers_probe_with_room_name() {
        let socket = bind_responder(0).unwrap();
        let server_addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(serve_responder(socket, "lobby".to_string(), cancel.clone()));

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client_socket
            .send_to(&PROBE_MAGIC, server_addr)
            .await
            .unwrap();

        let mut reply_buf = [0u8; ROOM_NAME_REPLY_LEN];
        let (n, _) = client_socket.recv_from(&mut reply_buf).await.unwrap();
        assert_eq!(unpack_room_name(&reply_buf[..n]), "lobby");

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn responder_ignores_non_probe_datagrams() {
        let socket = bind_responder(0).unwrap();
        let server_addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(serve_responder(socket, "lobby".to_string(), cancel.clone()));

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client_socket.send_to(b"not-a-probe", server_addr).await.unwrap();

        let mut reply_buf = [0u8; ROOM_NAME_REPLY_LEN];
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            client_socket.recv_from(&mut reply_buf),
        )
        .await;
        assert!(result.is_err(), "responder should not reply to junk datagrams");

        cancel.cancel();
        let _ = handle.await;
    }
}
