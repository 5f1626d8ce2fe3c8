//! Server accept loop: admission, handshake, and the per-connection receive
//! tasks that drive the relay (threaded mode), plus a single-task reactor
//! loop that does the same work without a separate transmitter task.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use socket2::{Domain, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::display::Display;
use crate::frame::{self, FrameError};
use crate::registry::{ClientRecord, Registry};
use crate::relay::{self, Relay};

/// Longest username accepted at the handshake.
const MAX_USERNAME_LEN: usize = 32;

/// Message sent to a client turned away for lack of room.
const REGISTRY_FULL_MESSAGE: &[u8] = b"Too many clients!";

pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    pub max_frame_len: u32,
    pub backlog: u32,
}

/// Truncate a just-decoded username to the admitted maximum length.
fn truncate_username(mut username: Vec<u8>) -> Vec<u8> {
    username.truncate(MAX_USERNAME_LEN);
    username
}

/// Bind and listen with an explicit backlog, which `TcpListener::bind`
/// alone leaves at the platform default.
fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(socket.into())
}

/// Run the accept loop with a dedicated transmitter task: each connection
/// gets its own receive task, and all writes are serialized through
/// [`Relay`].
pub async fn run_threaded(
    config: ServerConfig,
    display: Arc<dyn Display>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind_listener(config.bind_addr, config.backlog)?;
    log::info!("listening on {}", config.bind_addr);

    let registry = Arc::new(Registry::new(config.max_clients));
    let (relay, transmitter) = Relay::new(registry.clone(), cancel.clone());
    let transmitter_handle = tokio::spawn(transmitter);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        log::info!("Received connection from {peer_addr}");
                        let registry = registry.clone();
                        let relay = relay.clone();
                        let display = display.clone();
                        let max_frame_len = config.max_frame_len;
                        let child_cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(
                                stream, peer_addr, registry, relay, display, max_frame_len, child_cancel,
                            )
                            .await
                            {
                                log::warn!("connection from {peer_addr} ended: {e}");
                            }
                        });
                    }
                    Err(e) => log::warn!("accept error: {e}"),
                }
            }
        }
    }

    drop(relay);
    let _ = transmitter_handle.await;
    log::debug!("server accept loop stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    relay: Relay,
    display: Arc<dyn Display>,
    max_frame_len: u32,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();

    let username = match frame::decode(&mut read_half, max_frame_len).await {
        Ok(u) => u,
        Err(FrameError::ConnectionClosed) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let username = truncate_username(username);

    if registry.size() >= registry.cap() {
        log::info!("{peer_addr}: rejected, registry full");
        let _ = frame::write_frame(&mut write_half, REGISTRY_FULL_MESSAGE).await;
        return Ok(());
    }

    let record = match registry.insert(username.clone(), write_half) {
        Ok(record) => record,
        Err(full) => {
            log::info!("{peer_addr}: {full}");
            return Ok(());
        }
    };

    log::info!(
        "{peer_addr}: {} joined as client {}",
        String::from_utf8_lossy(&username),
        record.id
    );

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = frame::decode(&mut read_half, max_frame_len) => result,
        };
        let payload = match result {
            Ok(p) => p,
            Err(FrameError::ConnectionClosed) => {
                log::info!("{peer_addr}: connection closed");
                break;
            }
            Err(e) => {
                log::warn!("{peer_addr}: frame error: {e}");
                break;
            }
        };

        if relay.submit(record.id, payload.clone()).await.is_err() {
            log::warn!("{peer_addr}: relay transmitter gone, stopping");
            break;
        }
        relay::display_payload(display.as_ref(), &payload);
    }

    record.mark_closed();
    Ok(())
}

/// Accumulates bytes read off one socket until a complete frame is
/// available, so a single reactor task can multiplex many connections
/// without losing partially-read frames between readiness events.
struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Drain `buf` of as many complete frames as are present, stripping each
    /// frame's length prefix and NUL terminator.
    fn drain_frames(&mut self, max_frame_len: u32) -> Result<Vec<Vec<u8>>, FrameError> {
        let mut payloads = Vec::new();
        loop {
            if self.buf.len() < frame::LEN_FIELD_SIZE as usize {
                break;
            }
            let len_bytes: [u8; 4] = self.buf[..4].try_into().unwrap();
            let frame_len = u32::from_be_bytes(len_bytes);
            if frame_len < frame::MIN_FRAME_LEN {
                return Err(FrameError::FrameTooSmall {
                    len: frame_len,
                    min: frame::MIN_FRAME_LEN,
                });
            }
            if frame_len > max_frame_len {
                return Err(FrameError::FrameTooLarge {
                    len: frame_len,
                    max: max_frame_len,
                });
            }
            if (self.buf.len() as u32) < frame_len {
                break;
            }
            let mut frame_bytes: Vec<u8> = self.buf.drain(..frame_len as usize).collect();
            frame_bytes.drain(..frame::LEN_FIELD_SIZE as usize);
            frame_bytes.pop();
            payloads.push(frame_bytes);
        }
        Ok(payloads)
    }
}

/// Single-task reactor: one loop polls the listener and every registered
/// client's socket for readiness, decoding and fanning out synchronously
/// with no helper transmitter task.
pub async fn run_reactor(
    config: ServerConfig,
    display: Arc<dyn Display>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind_listener(config.bind_addr, config.backlog)?;
    log::info!("listening on {} (reactor mode)", config.bind_addr);

    let registry = Registry::new(config.max_clients);
    let mut readers: Vec<(Arc<ClientRecord>, OwnedReadHalf)> = Vec::new();
    let mut assemblers: Vec<FrameAssembler> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        log::info!("Received connection from {peer_addr}");
                        let (mut read_half, mut write_half) = stream.into_split();
                        match frame::decode(&mut read_half, config.max_frame_len).await {
                            Ok(username) => {
                                let username = truncate_username(username);
                                if registry.size() >= registry.cap() {
                                    log::info!("{peer_addr}: rejected, registry full");
                                    let _ = frame::write_frame(&mut write_half, REGISTRY_FULL_MESSAGE).await;
                                } else {
                                    match registry.insert(username.clone(), write_half) {
                                        Ok(record) => {
                                            log::info!(
                                                "{peer_addr}: {} joined as client {}",
                                                String::from_utf8_lossy(&username),
                                                record.id
                                            );
                                            readers.push((record, read_half));
                                            assemblers.push(FrameAssembler::new());
                                        }
                                        Err(full) => log::info!("{peer_addr}: {full}"),
                                    }
                                }
                            }
                            Err(e) => log::info!("{peer_addr}: handshake failed: {e}"),
                        }
                    }
                    Err(e) => log::warn!("accept error: {e}"),
                }
            }
            idx = wait_any_readable(&readers), if !readers.is_empty() => {
                let mut closed = false;
                let mut read_buf = [0u8; 4096];
                loop {
                    match readers[idx].1.try_read(&mut read_buf) {
                        Ok(0) => {
                            closed = true;
                            break;
                        }
                        Ok(n) => assemblers[idx].buf.extend_from_slice(&read_buf[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(_) => {
                            closed = true;
                            break;
                        }
                    }
                }

                match assemblers[idx].drain_frames(config.max_frame_len) {
                    Ok(payloads) => {
                        for payload in payloads {
                            let originator = readers[idx].0.id;
                            for (record, _) in readers.iter() {
                                if record.id == originator || record.is_closed() {
                                    continue;
                                }
                                if let Ok(frame) = frame::encode(&payload) {
                                    let mut writer = record.writer.lock().await;
                                    if writer.write_all(&frame).await.is_err() {
                                        drop(writer);
                                        record.mark_closed();
                                    }
                                }
                            }
                            relay::display_payload(display.as_ref(), &payload);
                        }
                    }
                    Err(e) => {
                        log::warn!("reactor: frame error on client {}: {e}", readers[idx].0.id);
                        closed = true;
                    }
                }

                if closed {
                    readers[idx].0.mark_closed();
                    readers.remove(idx);
                    assemblers.remove(idx);
                }
            }
        }
    }

    log::debug!("reactor loop stopped");
    Ok(())
}

/// Resolve to the index of the first reader whose socket is readable.
///
/// `OwnedReadHalf` does not `Deref` to `TcpStream` and so has no
/// `poll_read_ready`; it only exposes the async `readable()`. Each call
/// builds one `readable()` future per reader and polls them by hand so the
/// set can be awaited together without pulling in a futures-combinator
/// crate just for this.
async fn wait_any_readable(readers: &[(Arc<ClientRecord>, OwnedReadHalf)]) -> usize {
    let mut pending: Vec<Pin<Box<dyn Future<Output = std::io::Result<()>> + '_>>> = readers
        .iter()
        .map(|(_, read_half)| Box::pin(read_half.readable()) as Pin<Box<dyn Future<Output = _> + '_>>)
        .collect();

    std::future::poll_fn(move |cx| {
        for (i, fut) in pending.iter_mut().enumerate() {
            if fut.as_mut().poll(cx).is_ready() {
                return Poll::Ready(i);
            }
        }
        Poll::Pending
    })
    .await
}
