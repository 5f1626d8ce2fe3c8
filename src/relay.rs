//! The relay core: serializes incoming messages and fans each one out to
//! every other registered client.
//!
//! A submit/completed rendezvous built from a capacity-1 `mpsc` channel
//! whose items each carry their own one-shot completion channel. "At most
//! one pending submission" falls out of the channel capacity; "wait for
//! *my* completion, not anyone else's" falls out of each submission owning
//! a private oneshot rather than comparing ids against shared mutable
//! state — there is no id to race on because there is no shared completion
//! slot at all.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::display::Display;
use crate::frame;
use crate::registry::{ClientId, Registry};

/// One pending broadcast request: a decoded frame from `originator`,
/// together with the means for the submitter to learn when fan-out (and
/// hence its own turn to write to the display) may proceed.
struct Submission {
    originator: ClientId,
    payload: Vec<u8>,
    done: oneshot::Sender<()>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay transmitter has shut down")]
    TransmitterGone,
}

/// Handle receive tasks use to submit a decoded frame for broadcast.
///
/// Cheaply cloneable (wraps an `mpsc::Sender`); every receive task gets its
/// own clone.
#[derive(Clone)]
pub struct Relay {
    tx: mpsc::Sender<Submission>,
}

impl Relay {
    /// Construct a relay and its transmitter task. The caller is
    /// responsible for spawning the returned future (typically via
    /// `tokio::spawn`).
    pub fn new(
        registry: Arc<Registry>,
        cancel: CancellationToken,
    ) -> (Self, impl std::future::Future<Output = ()>) {
        // Capacity 1: at most one pending submission at a time.
        let (tx, rx) = mpsc::channel(1);
        let relay = Relay { tx };
        let transmitter = run_transmitter(rx, registry, cancel);
        (relay, transmitter)
    }

    /// Submit a decoded frame for broadcast to every other registered
    /// client, blocking until the transmitter has finished fanning it out.
    ///
    /// On return the caller (a receive task) is clear to write `payload`
    /// to the display exactly once — the transmitter never writes to the
    /// display itself, so exactly one copy is ever displayed by
    /// construction (only the originating receive task ever does it, and
    /// only after its own submission has cleared).
    pub async fn submit(&self, originator: ClientId, payload: Vec<u8>) -> Result<(), RelayError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Submission {
                originator,
                payload,
                done: done_tx,
            })
            .await
            .map_err(|_| RelayError::TransmitterGone)?;
        done_rx.await.map_err(|_| RelayError::TransmitterGone)?;
        Ok(())
    }
}

/// The single transmitter task: takes one submission at a time, snapshots
/// the registry, and fans the payload out to every other open record.
///
/// A send failure to one peer does not abort broadcast to the rest; the
/// offending record is marked closed instead.
async fn run_transmitter(
    mut rx: mpsc::Receiver<Submission>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) {
    loop {
        let submission = tokio::select! {
            _ = cancel.cancelled() => break,
            submission = rx.recv() => match submission {
                Some(s) => s,
                None => break,
            },
        };

        let Submission {
            originator,
            payload,
            done,
        } = submission;

        // The payload was itself decoded from a frame within the configured
        // cap, so re-encoding it can never exceed that cap.
        let frame = match frame::encode(&payload) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("relay: refusing to re-encode payload from {originator}: {e}");
                let _ = done.send(());
                continue;
            }
        };

        for record in registry.snapshot() {
            if record.id == originator || record.is_closed() {
                continue;
            }
            let mut writer = record.writer.lock().await;
            if let Err(e) = writer.write_all(&frame).await {
                log::warn!("relay: send to client {} failed, closing: {e}", record.id);
                drop(writer);
                record.mark_closed();
            }
        }

        // Signal completion; caller's turn to display the message.
        let _ = done.send(());
    }
}

/// Display a relayed payload on the server's own pane, lossily decoding it
/// as UTF-8 (the wire protocol carries opaque bytes; UTF-8 is conventional
/// but not enforced).
pub fn display_payload(display: &dyn Display, payload: &[u8]) {
    display.write_line(&String::from_utf8_lossy(payload));
}
