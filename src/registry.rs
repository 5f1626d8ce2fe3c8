//! The server's bounded, append-only client registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

/// Server-assigned client identifier, monotonic in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u32);

impl ClientId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admitted client: its username, id, and owned write half.
///
/// The write half is behind a `tokio::sync::Mutex` rather than bare: only
/// one task ever writes to a given socket at a time, but which task that is
/// differs by concurrency mode (the dedicated transmitter in one mode, the
/// single reactor loop in the other), so the lock lets both share this same
/// record type without a second, mode-specific wrapper.
pub struct ClientRecord {
    pub id: ClientId,
    pub username: Vec<u8>,
    pub writer: AsyncMutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl ClientRecord {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Error returned by [`Registry::insert`] when the registry is already at
/// capacity.
#[derive(Debug, thiserror::Error)]
#[error("registry is full ({cap} clients)")]
pub struct RegistryFullError {
    pub cap: usize,
}

/// Bounded, append-only collection of [`ClientRecord`]s, indexed by
/// [`ClientId`] and iterated in insertion order.
///
/// There is deliberately no `remove`: disconnected sockets remain in the
/// registry with their original record, marked closed and skipped during
/// fan-out.
pub struct Registry {
    records: RwLock<Vec<Arc<ClientRecord>>>,
    cap: usize,
}

impl Registry {
    pub fn new(cap: usize) -> Self {
        assert!(cap >= 1, "registry cap must be >= 1");
        Self {
            records: RwLock::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    /// Insert a newly-admitted client, assigning it the next `ClientId`.
    ///
    /// Returns [`RegistryFullError`] if the registry is already at capacity;
    /// callers use this to trigger the "Too many clients!" admission
    /// rejection.
    pub fn insert(
        &self,
        username: Vec<u8>,
        writer: OwnedWriteHalf,
    ) -> Result<Arc<ClientRecord>, RegistryFullError> {
        let mut records = self.records.write();
        if records.len() >= self.cap {
            return Err(RegistryFullError { cap: self.cap });
        }
        let id = ClientId(records.len() as u32);
        let record = Arc::new(ClientRecord {
            id,
            username,
            writer: AsyncMutex::new(writer),
            closed: AtomicBool::new(false),
        });
        records.push(record.clone());
        Ok(record)
    }

    /// A consistent point-in-time view of all records (open and closed),
    /// in insertion order, for the relay's fan-out.
    pub fn snapshot(&self) -> Vec<Arc<ClientRecord>> {
        self.records.read().clone()
    }

    pub fn size(&self) -> usize {
        self.records.read().len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_write_half() -> OwnedWriteHalf {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) =
            tokio::try_join!(TcpStream::connect(addr), listener.accept()).unwrap();
        drop(server);
        let (_read, write) = client.into_split();
        write
    }

    #[tokio::test]
    async fn insert_assigns_ids_in_accept_order() {
        let registry = Registry::new(2);
        let a = registry
            .insert(b"a".to_vec(), loopback_write_half().await)
            .unwrap();
        let b = registry
            .insert(b"b".to_vec(), loopback_write_half().await)
            .unwrap();
        assert_eq!(a.id.get(), 0);
        assert_eq!(b.id.get(), 1);
        assert_eq!(registry.size(), 2);
    }

    #[tokio::test]
    async fn insert_past_cap_is_rejected() {
        let registry = Registry::new(1);
        registry
            .insert(b"a".to_vec(), loopback_write_half().await)
            .unwrap();
        let err = registry
            .insert(b"b".to_vec(), loopback_write_half().await)
            .unwrap_err();
        assert_eq!(err.cap, 1);
        assert_eq!(registry.size(), 1);
    }

    #[tokio::test]
    async fn closed_records_remain_in_snapshot() {
        let registry = Registry::new(2);
        let a = registry
            .insert(b"a".to_vec(), loopback_write_half().await)
            .unwrap();
        a.mark_closed();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_closed());
    }
}
