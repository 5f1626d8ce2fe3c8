//! Client duplex loop: one TCP connection, two concurrent tasks sharing it
//! via `into_split()` — one forwarding stdin lines out, one forwarding
//! decoded frames to the display.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::display::Display;
use crate::frame::{self, FrameError};

/// Connect to `addr`, send `username` as the handshake frame, then run the
/// duplex send/receive loop until the connection closes or `cancel` fires.
pub async fn run(
    addr: SocketAddr,
    username: String,
    max_frame_len: u32,
    display: Arc<dyn Display>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    frame::write_frame(&mut write_half, username.as_bytes()).await?;

    let send_display = display.clone();
    let send_cancel = cancel.clone();
    let send_task = tokio::spawn(async move {
        run_send_loop(write_half, username, send_display, send_cancel).await
    });

    let receive_task = tokio::spawn(async move {
        run_receive_loop(&mut read_half, display, max_frame_len, cancel).await
    });

    let (send_result, receive_result) = tokio::join!(send_task, receive_task);
    send_result??;
    receive_result??;
    Ok(())
}

async fn run_send_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    username: String,
    display: Arc<dyn Display>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let line = match line {
            Some(l) => l,
            None => {
                cancel.cancel();
                break;
            }
        };

        let message = format!("[{username}] {line}");
        if let Err(e) = frame::write_frame(&mut write_half, message.as_bytes()).await {
            log::warn!("send failed: {e}");
            cancel.cancel();
            break;
        }
        display.write_line(&message);
        display.clear_input();
    }
    Ok(())
}

async fn run_receive_loop(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    display: Arc<dyn Display>,
    max_frame_len: u32,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = frame::decode(read_half, max_frame_len) => result,
        };
        match result {
            Ok(payload) => display.write_line(&String::from_utf8_lossy(&payload)),
            Err(FrameError::ConnectionClosed) => {
                log::info!("connection closed");
                cancel.cancel();
                break;
            }
            Err(e) => {
                log::warn!("receive failed: {e}");
                cancel.cancel();
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::test_support::RecordingDisplay;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn client_sends_username_then_relays_stdin_and_receives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = stream.into_split();
            let username = frame::decode(&mut read_half, frame::DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
            assert_eq!(username, b"alice");
            frame::write_frame(&mut write_half, b"[bob] hi there")
                .await
                .unwrap();
        });

        let display = Arc::new(RecordingDisplay::new());
        let cancel = CancellationToken::new();
        let client_cancel = cancel.clone();
        tokio::spawn(run(
            addr,
            "alice".to_string(),
            frame::DEFAULT_MAX_FRAME_LEN,
            display.clone(),
            client_cancel,
        ));

        server.await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        assert!(display.lines().iter().any(|l| l.contains("hi there")));
    }
}
