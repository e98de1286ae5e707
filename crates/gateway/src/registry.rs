use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::RwLock;

use hermes_protocol::{Address, Registration};

use crate::connection::{Connection, ConnectionId, ConnectionState};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered with the gateway")]
    DuplicateConnection(ConnectionId),

    #[error("connection {0} is not live")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} is already bound to {1}")]
    AlreadyBound(ConnectionId, Address),
}

#[derive(Default)]
struct Inner {
    /// All live connections, keyed by identity.
    by_id: HashMap<ConnectionId, Arc<Connection>>,
    /// address → registered connections (many clients may share one address).
    by_address: HashMap<Address, HashSet<ConnectionId>>,
}

/// Live client connections with an address index for fan-out.
///
/// Every read returns an owned copy, so callers can iterate and await while
/// the live set keeps changing.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    accepted: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly accepted connection.
    pub async fn add(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let id = conn.id();
        if inner.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        inner.by_id.insert(id, conn);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Bind a live connection to an address and index it.
    ///
    /// Binding and indexing happen under one write lock, so fan-out never sees
    /// a registered connection missing from the index.
    pub async fn register(
        &self,
        conn: &Connection,
        registration: Registration,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let id = conn.id();
        if !inner.by_id.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }
        let address = registration.address;
        if let Err(rejected) = conn.bind(registration) {
            let bound = conn.address().unwrap_or(rejected.address);
            return Err(RegistryError::AlreadyBound(id, bound));
        }
        inner.by_address.entry(address).or_default().insert(id);
        Ok(())
    }

    /// Remove a connection. Absent ids are ignored, so racing cleanups are harmless.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write().await;
        let conn = inner.by_id.remove(&id)?;
        if let Some(address) = conn.address()
            && let Some(ids) = inner.by_address.get_mut(&address)
        {
            ids.remove(&id);
            if ids.is_empty() {
                inner.by_address.remove(&address);
            }
        }
        Some(conn)
    }

    /// Consistent copy of every live connection.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.read().await.by_id.values().cloned().collect()
    }

    /// Registered connections whose address equals `address` exactly.
    pub async fn matching(&self, address: Address) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_address.get(&address) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|conn| conn.state() == ConnectionState::Registered)
            .cloned()
            .collect()
    }

    /// Every registered connection, whatever its address.
    pub async fn registered(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner
            .by_address
            .values()
            .flatten()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|conn| conn.state() == ConnectionState::Registered)
            .cloned()
            .collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().await.by_id.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Connections accepted since startup, including ones already gone.
    pub fn accepted_total(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}
