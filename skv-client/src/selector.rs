//! # Server Selection
//!
//! Purpose: Map a command key to the backend that owns it.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `ModuloSelector` and `HashRingSelector` share the
//!    `ServerSelector` trait and are chosen by the caller.
//! 2. **Read-Mostly Locking**: Topology is static at steady state, so lookups
//!    take a shared lock and only `add` takes the exclusive one.
//! 3. **Typed Misconfiguration**: Selecting from an empty selector returns
//!    `ClientError::NoServers` instead of a default server.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ClientError, ClientResult};
use crate::server::ServerInfo;

/// Virtual points placed on the ring for every server.
pub const RING_REPLICAS: usize = 20;

/// Maps keys to servers.
pub trait ServerSelector: Send + Sync {
    /// Registers a backend. Register each backend once.
    fn add(&self, server: ServerInfo);

    /// Returns the backend owning `key`.
    fn get(&self, key: &[u8]) -> ClientResult<Arc<ServerInfo>>;

    /// Returns the reference backend for commands without a key.
    fn get_first(&self) -> ClientResult<Arc<ServerInfo>>;

    /// Number of registered backends.
    fn total_servers(&self) -> usize;

    /// True when keys may live on different backends.
    fn is_sharding(&self) -> bool {
        self.total_servers() > 1
    }
}

/// Selector hashing keys with CRC-32 modulo the number of servers.
///
/// Adding a server reshuffles almost every key.
#[derive(Debug, Default)]
pub struct ModuloSelector {
    servers: RwLock<Vec<Arc<ServerInfo>>>,
}

impl ModuloSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerSelector for ModuloSelector {
    fn add(&self, server: ServerInfo) {
        write_lock(&self.servers).push(Arc::new(server));
    }

    fn get(&self, key: &[u8]) -> ClientResult<Arc<ServerInfo>> {
        let servers = read_lock(&self.servers);
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        let idx = crc32fast::hash(key) as usize % servers.len();
        Ok(Arc::clone(&servers[idx]))
    }

    fn get_first(&self) -> ClientResult<Arc<ServerInfo>> {
        read_lock(&self.servers)
            .first()
            .cloned()
            .ok_or(ClientError::NoServers)
    }

    fn total_servers(&self) -> usize {
        read_lock(&self.servers).len()
    }
}

#[derive(Debug, Default)]
struct Ring {
    points: BTreeMap<u32, String>,
    servers: HashMap<String, Arc<ServerInfo>>,
    first: Option<Arc<ServerInfo>>,
}

/// Consistent-hash selector keyed by server address.
///
/// Adding one server to `n` moves roughly `1 / (n + 1)` of the keys.
#[derive(Debug, Default)]
pub struct HashRingSelector {
    ring: RwLock<Ring>,
}

impl HashRingSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerSelector for HashRingSelector {
    fn add(&self, server: ServerInfo) {
        let token = server.key();
        let server = Arc::new(server);
        let mut ring = write_lock(&self.ring);
        if ring.first.is_none() {
            ring.first = Some(Arc::clone(&server));
        }
        for idx in 0..RING_REPLICAS {
            let point = crc32fast::hash(format!("{}{}", idx, token).as_bytes());
            ring.points.insert(point, token.clone());
        }
        ring.servers.insert(token, server);
    }

    fn get(&self, key: &[u8]) -> ClientResult<Arc<ServerInfo>> {
        let ring = read_lock(&self.ring);
        let hash = crc32fast::hash(key);
        let token = ring
            .points
            .range((Excluded(hash), Unbounded))
            .next()
            .or_else(|| ring.points.iter().next())
            .map(|(_, token)| token)
            .ok_or(ClientError::NoServers)?;
        // Every token on the ring was inserted together with its server.
        ring.servers.get(token).cloned().ok_or(ClientError::NoServers)
    }

    fn get_first(&self) -> ClientResult<Arc<ServerInfo>> {
        read_lock(&self.ring).first.clone().ok_or(ClientError::NoServers)
    }

    fn total_servers(&self) -> usize {
        read_lock(&self.ring).servers.len()
    }
}

// Selector state stays consistent even if a writer panicked: every mutation
// is a single push/insert.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
